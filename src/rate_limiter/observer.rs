//! Observation hooks for limiter transitions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ScrapeError;

/// Receives limiter events. Hooks run outside the limiter lock and a
/// panicking hook is caught and logged.
pub trait LimiterObserver: Send + Sync {
    fn on_error(&self, _error: &ScrapeError, _retry_count: u32) {}

    fn on_success(&self, _duration: Duration) {}

    fn on_queue_change(&self, _queue_size: usize) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LimiterObserver for NoopObserver {}

/// Default observer: writes limiter events to the tracing log.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    name: String,
}

impl TracingObserver {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl LimiterObserver for TracingObserver {
    fn on_error(&self, error: &ScrapeError, retry_count: u32) {
        warn!("[{}] Error (retry {}): {}", self.name, retry_count, error);
    }

    fn on_success(&self, duration: Duration) {
        info!(
            "[{}] Request completed in {}ms",
            self.name,
            duration.as_millis()
        );
    }

    fn on_queue_change(&self, queue_size: usize) {
        if queue_size > 0 {
            debug!("[{}] Queue size: {}", self.name, queue_size);
        }
    }
}

pub(crate) fn notify(observer: &dyn LimiterObserver, hook: impl FnOnce(&dyn LimiterObserver)) {
    if catch_unwind(AssertUnwindSafe(|| hook(observer))).is_err() {
        warn!("Limiter observer panicked; event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exploding;

    impl LimiterObserver for Exploding {
        fn on_success(&self, _duration: Duration) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_notify_swallows_panics() {
        notify(&Exploding, |o| o.on_success(Duration::from_millis(5)));
        notify(&NoopObserver, |o| o.on_queue_change(2));
    }
}
