//! Instance ranking for failover.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use super::health::{InstanceHealth, InstanceStatus};

/// Eligibility tier. Lower is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Healthy = 0,
    /// Rate limited, but the cooldown has elapsed.
    CooledDown = 1,
    /// Unhealthy instances stay selectable as a last resort.
    LastResort = 2,
}

/// Tier for an instance, or `None` while it is cooling down.
pub fn tier(health: &InstanceHealth, now: Instant) -> Option<Tier> {
    match health.status {
        InstanceStatus::Healthy => Some(Tier::Healthy),
        InstanceStatus::RateLimited => match health.rate_limited_until {
            Some(until) if now < until => None,
            _ => Some(Tier::CooledDown),
        },
        InstanceStatus::Unhealthy => Some(Tier::LastResort),
    }
}

fn compare(a: &(Tier, &InstanceHealth), b: &(Tier, &InstanceHealth)) -> Ordering {
    a.0.cmp(&b.0)
        .then(a.1.consecutive_failures.cmp(&b.1.consecutive_failures))
        .then(
            a.1.avg_response_time
                .partial_cmp(&b.1.avg_response_time)
                .unwrap_or(Ordering::Equal),
        )
}

/// Pick the best candidate. Ties keep candidate order.
///
/// Returns `Err(retry_after)` when every candidate is cooling down, with the
/// shortest remaining cooldown.
pub fn pick<'a>(
    candidates: impl IntoIterator<Item = &'a InstanceHealth>,
    now: Instant,
) -> Result<&'a InstanceHealth, Option<Duration>> {
    let mut best: Option<(Tier, &InstanceHealth)> = None;
    let mut soonest: Option<Duration> = None;

    for health in candidates {
        match tier(health, now) {
            Some(t) => {
                let entry = (t, health);
                let better = match &best {
                    Some(current) => compare(&entry, current) == Ordering::Less,
                    None => true,
                };
                if better {
                    best = Some(entry);
                }
            }
            None => {
                let left = health.cooldown_remaining(now);
                soonest = match (soonest, left) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }
        }
    }

    best.map(|(_, health)| health).ok_or(soonest)
}
