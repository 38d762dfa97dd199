//! Limiter counters and the snapshot type served by `/metrics`.

use std::time::Duration;

use serde::Serialize;

use crate::error::FailureKind;

/// Point-in-time view of a limiter, taken under a single lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    /// Requests whose caller went away before they settled. Also counted
    /// in `failed_requests`.
    pub cancelled_requests: u64,
    /// Failed attempts by kind, retried ones included.
    pub failures_by_kind: FailureCounts,
    /// Mean duration of successful attempts, in milliseconds.
    pub average_response_time: f64,
    pub current_queue_size: usize,
    pub active_requests: usize,
}

/// Attempt failures split so layout breakage stands apart from transport
/// trouble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub transport: u64,
    pub layout: u64,
    pub throttled: u64,
    pub client: u64,
    pub other: u64,
}

impl FailureCounts {
    pub fn record(&mut self, kind: FailureKind) {
        let slot = match kind {
            FailureKind::Transport => &mut self.transport,
            FailureKind::Layout => &mut self.layout,
            FailureKind::Throttled => &mut self.throttled,
            FailureKind::Client => &mut self.client,
            FailureKind::Other => &mut self.other,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub failures: FailureCounts,
    pub average_ms: f64,
}

impl Counters {
    pub fn record_success(&mut self, elapsed: Duration) {
        self.successful += 1;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.average_ms += (sample - self.average_ms) / self.successful as f64;
    }

    pub fn snapshot(&self, queue_size: usize, active: usize) -> LimiterMetrics {
        LimiterMetrics {
            total_requests: self.total,
            successful_requests: self.successful,
            failed_requests: self.failed,
            retried_requests: self.retried,
            cancelled_requests: self.cancelled,
            failures_by_kind: self.failures,
            average_response_time: self.average_ms,
            current_queue_size: queue_size,
            active_requests: active,
        }
    }
}
