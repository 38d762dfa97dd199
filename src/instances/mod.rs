//! Mirror instance health registry.
//!
//! Tracks every mirror referenced by a job and picks the best one for the
//! next attempt. Healthy instances win over cooled-down rate-limited ones,
//! which win over unhealthy ones; unhealthy instances are restored after a
//! quiet period so the pool heals on its own.

mod health;
mod selection;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ScrapeError;
pub use health::{InstanceHealth, InstanceSnapshot, InstanceStatus, RegistryConfig};
pub use selection::Tier;

/// Result of one attempt against an instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttemptOutcome {
    Success { response_time: Duration },
    Failure,
    RateLimited { retry_after: Option<Duration> },
}

impl AttemptOutcome {
    /// Classify the result of an attempt for health accounting.
    ///
    /// A missing profile is a correct answer from the mirror, so it counts
    /// as a success for the instance.
    pub fn classify<T>(result: &Result<T, ScrapeError>, response_time: Duration) -> Self {
        match result {
            Ok(_) | Err(ScrapeError::NotFound { .. }) | Err(ScrapeError::Validation { .. }) => {
                Self::Success { response_time }
            }
            Err(ScrapeError::RateLimited { retry_after, .. }) => Self::RateLimited {
                retry_after: *retry_after,
            },
            Err(_) => Self::Failure,
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_url: HashMap<String, InstanceHealth>,
    /// First-reference order, used for snapshots.
    order: Vec<String>,
}

impl Entries {
    fn ensure(&mut self, url: &str) -> &mut InstanceHealth {
        if !self.by_url.contains_key(url) {
            debug!("Tracking new instance {}", url);
            self.order.push(url.to_string());
        }
        self.by_url
            .entry(url.to_string())
            .or_insert_with(|| InstanceHealth::new(url))
    }
}

/// Shared registry of instance health. Clones share state.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    config: RegistryConfig,
    entries: Arc<Mutex<Entries>>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl InstanceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(Entries::default())),
        }
    }

    /// Create a registry that already tracks `urls`.
    pub fn with_instances(config: RegistryConfig, urls: &[String]) -> Self {
        let registry = Self::new(config);
        {
            let mut entries = registry.lock();
            for url in urls {
                entries.ensure(url);
            }
        }
        registry
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Select the best instance among `candidates`.
    pub fn select_instance(&self, candidates: &[String]) -> Result<String, ScrapeError> {
        let now = Instant::now();
        let mut entries = self.lock();

        for url in candidates {
            let health = entries.ensure(url);
            if health.restore_if_due(now, &self.config) {
                info!("Instance {} restored after quiet period", url);
            }
        }

        let chosen = selection::pick(
            candidates.iter().filter_map(|url| entries.by_url.get(url)),
            now,
        );

        match chosen {
            Ok(health) => Ok(health.url.clone()),
            Err(retry_after) => Err(ScrapeError::NoInstance {
                candidates: candidates.len(),
                retry_after,
            }),
        }
    }

    /// Select an instance and return a lease for one attempt.
    pub fn lease(&self, candidates: &[String]) -> Result<InstanceLease, ScrapeError> {
        let url = self.select_instance(candidates)?;
        Ok(InstanceLease {
            registry: self.clone(),
            url,
            started: Instant::now(),
            reported: false,
        })
    }

    /// Record the outcome of an attempt against `url`.
    pub fn report_outcome(&self, url: &str, outcome: AttemptOutcome) {
        let now = Instant::now();
        let mut entries = self.lock();
        let health = entries.ensure(url);

        match outcome {
            AttemptOutcome::Success { response_time } => {
                if health.status != InstanceStatus::Healthy {
                    info!("Instance {} is healthy again", url);
                }
                health.record_success(response_time, self.config.smoothing);
            }
            AttemptOutcome::RateLimited { retry_after } => {
                let cooldown = health.record_rate_limit(now, retry_after, &self.config);
                warn!(
                    "Instance {} rate limited (hit {}), cooling down for {:?}",
                    url, health.rate_limit_hits, cooldown
                );
            }
            AttemptOutcome::Failure => {
                let was = health.status;
                health.record_failure(now, &self.config);
                if was != InstanceStatus::Unhealthy && health.status == InstanceStatus::Unhealthy {
                    warn!(
                        "Instance {} marked unhealthy after {} consecutive failures",
                        url, health.consecutive_failures
                    );
                } else {
                    debug!(
                        "Instance {} failure #{}",
                        url, health.consecutive_failures
                    );
                }
            }
        }
    }

    /// Snapshot of every tracked instance, in first-reference order.
    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let now = Instant::now();
        let mut entries = self.lock();
        let Entries { by_url, order } = &mut *entries;
        let mut out = Vec::with_capacity(order.len());
        for url in order.iter() {
            if let Some(health) = by_url.get_mut(url) {
                health.restore_if_due(now, &self.config);
                out.push(health.snapshot(now));
            }
        }
        out
    }

    /// Current health of one instance.
    pub fn get(&self, url: &str) -> Option<InstanceHealth> {
        self.lock().by_url.get(url).cloned()
    }

    /// Whether any tracked instance could be selected right now.
    pub fn any_eligible(&self) -> bool {
        let now = Instant::now();
        self.lock()
            .by_url
            .values()
            .any(|h| selection::tier(h, now).is_some())
    }
}

/// An instance handed out for one attempt.
///
/// Only reported outcomes touch the instance's health. A lease dropped
/// unreported (the caller was cancelled from outside) leaves it unchanged.
#[derive(Debug)]
pub struct InstanceLease {
    registry: InstanceRegistry,
    url: String,
    started: Instant,
    reported: bool,
}

impl InstanceLease {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Report the attempt's result and consume the lease.
    pub fn complete<T>(mut self, result: &Result<T, ScrapeError>) {
        let outcome = AttemptOutcome::classify(result, self.started.elapsed());
        self.registry.report_outcome(&self.url, outcome);
        self.reported = true;
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        if !self.reported {
            debug!("Attempt on {} abandoned without an outcome", self.url);
        }
    }
}
