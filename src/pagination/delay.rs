//! Inter-page pacing.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::{PaginationConfig, ProgressSink};

/// `base` with uniform jitter of `±jitter_ratio`, the jitter capped at
/// `jitter_cap`. A zero base stays zero.
pub fn jittered_delay(base: Duration, config: &PaginationConfig) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let base_ms = base.as_secs_f64() * 1000.0;
    let spread = (base_ms * config.jitter_ratio.clamp(0.0, 1.0)).min(config.jitter_cap_ms as f64);
    if spread <= 0.0 {
        return base;
    }
    let offset = rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64(((base_ms + offset).max(0.0)) / 1000.0)
}

/// Sleep between pages.
pub async fn apply_rate_limit_delay(
    base: Duration,
    config: &PaginationConfig,
    progress: &dyn ProgressSink,
    collected: usize,
    requested: usize,
) {
    let delay = jittered_delay(base, config);
    if delay.is_zero() {
        return;
    }
    progress.report(&format!(
        "Rate limit delay: {}ms ({}/{} collected)",
        delay.as_millis(),
        collected,
        requested
    ));
    debug!("Sleeping {:?} before next page", delay);
    tokio::time::sleep(delay).await;
}
