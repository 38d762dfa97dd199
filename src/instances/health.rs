//! Per-instance health state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Health status of a mirror instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Healthy,
    Unhealthy,
    RateLimited,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Registry tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Consecutive failures at which an instance is marked unhealthy.
    pub unhealthy_threshold: u32,
    /// Quiet period after the last failure before an unhealthy instance is
    /// restored.
    pub recovery_interval_ms: u64,
    /// Cooldown after the first rate-limit hit; doubles per repeated hit.
    pub rate_limit_cooldown_ms: u64,
    /// Upper bound for any cooldown.
    pub max_cooldown_ms: u64,
    /// Weight of a new sample in the response-time average.
    pub smoothing: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            recovery_interval_ms: 60_000,
            rate_limit_cooldown_ms: 60_000,
            max_cooldown_ms: 15 * 60_000,
            smoothing: 0.2,
        }
    }
}

impl RegistryConfig {
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    /// Cooldown for the `hits`-th consecutive rate-limit response.
    pub fn cooldown_for(&self, hits: u32, retry_after: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.max_cooldown_ms);
        if let Some(hint) = retry_after {
            return hint.min(cap);
        }
        let exponent = hits.saturating_sub(1).min(16);
        let scaled = self.rate_limit_cooldown_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(scaled).min(cap)
    }
}

/// Tracked state for one instance.
#[derive(Debug, Clone)]
pub struct InstanceHealth {
    pub url: String,
    pub status: InstanceStatus,
    pub consecutive_failures: u32,
    /// Smoothed response time in milliseconds. Zero until the first sample.
    pub avg_response_time: f64,
    pub rate_limited_until: Option<Instant>,
    pub rate_limit_hits: u32,
    pub last_failure: Option<Instant>,
    samples: u64,
}

impl InstanceHealth {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: InstanceStatus::Healthy,
            consecutive_failures: 0,
            avg_response_time: 0.0,
            rate_limited_until: None,
            rate_limit_hits: 0,
            last_failure: None,
            samples: 0,
        }
    }

    pub fn record_success(&mut self, response_time: Duration, smoothing: f64) {
        let sample = response_time.as_secs_f64() * 1000.0;
        self.avg_response_time = if self.samples == 0 {
            sample
        } else {
            self.avg_response_time * (1.0 - smoothing) + sample * smoothing
        };
        self.samples += 1;
        self.consecutive_failures = 0;
        self.rate_limit_hits = 0;
        self.rate_limited_until = None;
        self.status = InstanceStatus::Healthy;
    }

    pub fn record_failure(&mut self, now: Instant, config: &RegistryConfig) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        if self.consecutive_failures >= config.unhealthy_threshold {
            self.status = InstanceStatus::Unhealthy;
        }
    }

    pub fn record_rate_limit(
        &mut self,
        now: Instant,
        retry_after: Option<Duration>,
        config: &RegistryConfig,
    ) -> Duration {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        self.rate_limit_hits += 1;
        let cooldown = config.cooldown_for(self.rate_limit_hits, retry_after);
        self.rate_limited_until = Some(now + cooldown);
        self.status = InstanceStatus::RateLimited;
        cooldown
    }

    /// Restore an unhealthy instance once it has been quiet long enough.
    /// Returns true if the instance was restored.
    pub fn restore_if_due(&mut self, now: Instant, config: &RegistryConfig) -> bool {
        if self.status != InstanceStatus::Unhealthy {
            return false;
        }
        let quiet_since = match self.last_failure {
            Some(at) => now.saturating_duration_since(at),
            None => Duration::MAX,
        };
        if quiet_since >= config.recovery_interval() {
            self.status = InstanceStatus::Healthy;
            self.consecutive_failures = 0;
            true
        } else {
            false
        }
    }

    /// Remaining cooldown, if still rate limited.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        if self.status != InstanceStatus::RateLimited {
            return None;
        }
        self.rate_limited_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn snapshot(&self, now: Instant) -> InstanceSnapshot {
        let wall_now = Utc::now();
        let rate_limited_until = self.cooldown_remaining(now).and_then(|left| {
            chrono::Duration::from_std(left)
                .ok()
                .map(|left| wall_now + left)
        });
        InstanceSnapshot {
            url: self.url.clone(),
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            avg_response_time: self.avg_response_time.round() as u64,
            rate_limited_until,
        }
    }
}

/// Read-only view served by `/health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub url: String,
    pub status: InstanceStatus,
    pub consecutive_failures: u32,
    pub avg_response_time: u64,
    pub rate_limited_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_doubles_and_caps() {
        let config = RegistryConfig::default();
        assert_eq!(config.cooldown_for(1, None), Duration::from_secs(60));
        assert_eq!(config.cooldown_for(2, None), Duration::from_secs(120));
        assert_eq!(config.cooldown_for(3, None), Duration::from_secs(240));
        assert_eq!(config.cooldown_for(30, None), Duration::from_secs(900));
        assert_eq!(
            config.cooldown_for(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.cooldown_for(1, Some(Duration::from_secs(7200))),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_response_time_smoothing() {
        let mut health = InstanceHealth::new("https://a.example");
        health.record_success(Duration::from_millis(1000), 0.2);
        assert_eq!(health.avg_response_time, 1000.0);
        health.record_success(Duration::from_millis(2000), 0.2);
        assert!((health.avg_response_time - 1200.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_marks_unhealthy() {
        let config = RegistryConfig::default();
        let mut health = InstanceHealth::new("https://a.example");
        let now = Instant::now();

        health.record_failure(now, &config);
        health.record_failure(now, &config);
        assert_eq!(health.status, InstanceStatus::Healthy);
        health.record_failure(now, &config);
        assert_eq!(health.status, InstanceStatus::Unhealthy);

        health.record_success(Duration::from_millis(10), config.smoothing);
        assert_eq!(health.status, InstanceStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_after_quiet_period() {
        let config = RegistryConfig::default();
        let mut health = InstanceHealth::new("https://a.example");
        let start = Instant::now();
        for _ in 0..3 {
            health.record_failure(start, &config);
        }

        assert!(!health.restore_if_due(start + Duration::from_secs(59), &config));
        assert!(health.restore_if_due(start + Duration::from_secs(60), &config));
        assert_eq!(health.status, InstanceStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_wall_clock_cooldown() {
        let config = RegistryConfig::default();
        let mut health = InstanceHealth::new("https://a.example");
        let now = Instant::now();
        health.record_rate_limit(now, None, &config);

        let snapshot = health.snapshot(now);
        assert_eq!(snapshot.status, InstanceStatus::RateLimited);
        let until = snapshot.rate_limited_until.unwrap();
        assert!(until > Utc::now());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "rate_limited");
        assert_eq!(json["consecutiveFailures"], 1);
    }
}
