//! Rate limiter configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one rate limiter pool.
///
/// Durations are stored in milliseconds so the struct maps directly onto
/// config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum operations in flight at once.
    pub max_concurrent: usize,
    /// Sustained admission rate. Bursts up to `max(1, rps)` are allowed.
    pub requests_per_second: f64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `retry_delay_ms * n`.
    pub retry_delay_ms: u64,
    /// Deadline for a single attempt.
    pub timeout_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::fetch_pool()
    }
}

impl RateLimiterConfig {
    /// Job pool: a concurrency gate around whole scrape jobs.
    pub fn job_pool() -> Self {
        Self {
            max_concurrent: 5,
            requests_per_second: 100.0,
            max_retries: 0,
            retry_delay_ms: 1_000,
            timeout_ms: 600_000,
        }
    }

    /// Fetch pool: paces individual page loads against the mirrors.
    pub fn fetch_pool() -> Self {
        Self {
            max_concurrent: 2,
            requests_per_second: 2.0,
            max_retries: 3,
            retry_delay_ms: 2_000,
            timeout_ms: 120_000,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Clamp values that would stall the limiter forever.
    pub(crate) fn normalized(mut self) -> Self {
        if self.max_concurrent == 0 {
            self.max_concurrent = 1;
        }
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            self.requests_per_second = 1.0;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = Self::fetch_pool().timeout_ms;
        }
        self
    }
}
