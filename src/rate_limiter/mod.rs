//! Concurrency and rate limiter with retry.
//!
//! One `RateLimiter` guards one logical pool (the job pool or the fetch
//! pool). Admission needs both a free concurrency slot and a token from a
//! continuously refilled bucket; both are claimed together under one lock.
//! Callers that cannot be admitted wait in a queue that is released by
//! priority, then strictly in arrival order.

mod config;
mod metrics;
mod observer;

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ScrapeError;
pub use config::RateLimiterConfig;
use metrics::Counters;
pub use metrics::{FailureCounts, LimiterMetrics};
pub use observer::{LimiterObserver, NoopObserver, TracingObserver};

/// Priority used when callers have no preference. Higher values are
/// dispatched first; equal priorities keep insertion order.
pub const DEFAULT_PRIORITY: u32 = 0;

type QueueKey = (Reverse<u32>, u64);

struct State {
    active: usize,
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
    queue: BTreeMap<QueueKey, oneshot::Sender<SlotPermit>>,
    next_seq: u64,
    timer_armed: bool,
    counters: Counters,
}

impl State {
    fn refill(&mut self, now: Instant, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(self.capacity);
        self.last_refill = now;
    }
}

struct Inner {
    name: String,
    config: RateLimiterConfig,
    observer: Arc<dyn LimiterObserver>,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify_queue(&self, size: usize) {
        observer::notify(self.observer.as_ref(), |o| o.on_queue_change(size));
    }
}

/// Hand out slots to queued waiters while both resources are available.
///
/// Returns the new queue length if it changed. Must be called with the state
/// lock held; observers are notified by the caller after unlocking.
fn dispatch(inner: &Arc<Inner>, state: &mut State) -> Option<usize> {
    let before = state.queue.len();
    state.refill(Instant::now(), inner.config.requests_per_second);

    while state.active < inner.config.max_concurrent && !state.queue.is_empty() {
        if state.tokens < 1.0 {
            arm_timer(inner, state);
            break;
        }
        let Some((_, waiter)) = state.queue.pop_first() else {
            break;
        };
        state.active += 1;
        state.tokens -= 1.0;
        if let Err(mut permit) = waiter.send(SlotPermit::new(Arc::clone(inner))) {
            // Waiter went away between enqueue and dispatch.
            permit.disarm();
            state.active -= 1;
            state.tokens += 1.0;
        }
    }

    (state.queue.len() != before).then_some(state.queue.len())
}

/// Schedule a dispatch for when the next token becomes available.
fn arm_timer(inner: &Arc<Inner>, state: &mut State) {
    if state.timer_armed {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    state.timer_armed = true;

    let deficit = (1.0 - state.tokens).max(0.0);
    let wait = Duration::from_secs_f64(deficit / inner.config.requests_per_second)
        + Duration::from_millis(1);
    let inner = Arc::clone(inner);
    handle.spawn(async move {
        tokio::time::sleep(wait).await;
        let changed = {
            let mut state = inner.lock();
            state.timer_armed = false;
            dispatch(&inner, &mut state)
        };
        if let Some(size) = changed {
            inner.notify_queue(size);
        }
    });
}

/// An admitted slot. Dropping it frees the slot and wakes the next waiter.
pub struct SlotPermit {
    inner: Option<Arc<Inner>>,
}

impl SlotPermit {
    fn new(inner: Arc<Inner>) -> Self {
        Self { inner: Some(inner) }
    }

    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPermit")
            .field("pool", &self.inner.as_ref().map(|i| i.name.as_str()))
            .finish()
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let changed = {
                let mut state = inner.lock();
                state.active = state.active.saturating_sub(1);
                dispatch(&inner, &mut state)
            };
            if let Some(size) = changed {
                inner.notify_queue(size);
            }
        }
    }
}

/// Removes a waiter from the queue if its acquire future is cancelled.
struct QueuedGuard<'a> {
    inner: &'a Inner,
    key: Option<QueueKey>,
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let removed = {
                let mut state = self.inner.lock();
                state.queue.remove(&key).map(|_| state.queue.len())
            };
            if let Some(size) = removed {
                self.inner.notify_queue(size);
            }
        }
    }
}

/// Shared handle to one limiter pool. Clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter that logs its events through `tracing`.
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let name = name.into();
        let observer = Arc::new(TracingObserver::new(name.clone()));
        Self::with_observer(name, config, observer)
    }

    /// Create a limiter with a custom observer.
    pub fn with_observer(
        name: impl Into<String>,
        config: RateLimiterConfig,
        observer: Arc<dyn LimiterObserver>,
    ) -> Self {
        let config = config.normalized();
        let capacity = config.requests_per_second.max(1.0);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                observer,
                state: Mutex::new(State {
                    active: 0,
                    tokens: capacity,
                    capacity,
                    last_refill: Instant::now(),
                    queue: BTreeMap::new(),
                    next_seq: 0,
                    timer_armed: false,
                    counters: Counters::default(),
                }),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.config
    }

    /// Wait for a slot and a token.
    pub async fn acquire(&self, priority: u32) -> Result<SlotPermit, ScrapeError> {
        let (waiter, key, queue_size) = {
            let mut state = self.inner.lock();
            state.refill(Instant::now(), self.inner.config.requests_per_second);

            if state.queue.is_empty()
                && state.active < self.inner.config.max_concurrent
                && state.tokens >= 1.0
            {
                state.active += 1;
                state.tokens -= 1.0;
                return Ok(SlotPermit::new(Arc::clone(&self.inner)));
            }

            let key = (Reverse(priority), state.next_seq);
            state.next_seq += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.insert(key, tx);
            dispatch(&self.inner, &mut state);
            (rx, key, state.queue.len())
        };

        self.inner.notify_queue(queue_size);

        let mut guard = QueuedGuard {
            inner: &self.inner,
            key: Some(key),
        };
        let permit = waiter.await;
        guard.key = None;

        permit.map_err(|_| ScrapeError::Unknown {
            context: format!("{} limiter", self.inner.name),
            message: "slot request was dropped".to_string(),
        })
    }

    /// Run `operation` under this pool's admission control with the
    /// configured retry budget.
    pub async fn execute<T, F, Fut>(&self, priority: u32, operation: F) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        self.execute_with_retries(priority, self.inner.config.max_retries, operation)
            .await
    }

    /// Run `operation` with an explicit retry budget.
    ///
    /// Each attempt holds a slot only while it runs and is bounded by the
    /// configured timeout. Between attempts the slot is released and the
    /// operation is queued again after `retry_delay * attempt`. Errors that
    /// are not retryable surface immediately.
    pub async fn execute_with_retries<T, F, Fut>(
        &self,
        priority: u32,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        self.inner.lock().counters.total += 1;
        let mut in_flight = InFlight {
            inner: &self.inner,
            settled: false,
        };

        let timeout = self.inner.config.timeout();
        let mut retries = 0u32;

        loop {
            let permit = match self.acquire(priority).await {
                Ok(permit) => permit,
                Err(e) => {
                    let mut state = self.inner.lock();
                    state.counters.failed += 1;
                    state.counters.failures.record(e.kind());
                    in_flight.settled = true;
                    return Err(e);
                }
            };

            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ScrapeError::timeout(
                    format!("{} attempt", self.inner.name),
                    timeout,
                )),
            };
            let elapsed = started.elapsed();
            drop(permit);

            match outcome {
                Ok(value) => {
                    self.inner.lock().counters.record_success(elapsed);
                    in_flight.settled = true;
                    observer::notify(self.inner.observer.as_ref(), |o| o.on_success(elapsed));
                    return Ok(value);
                }
                Err(error) => {
                    self.inner.lock().counters.failures.record(error.kind());
                    observer::notify(self.inner.observer.as_ref(), |o| {
                        o.on_error(&error, retries)
                    });

                    if !error.is_retryable() || retries >= max_retries {
                        self.inner.lock().counters.failed += 1;
                        in_flight.settled = true;
                        return Err(error);
                    }

                    retries += 1;
                    self.inner.lock().counters.retried += 1;
                    let backoff = self.inner.config.retry_delay() * retries;
                    debug!(
                        "[{}] Retrying in {:?} (attempt {} of {})",
                        self.inner.name,
                        backoff,
                        retries + 1,
                        max_retries + 1
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Consistent snapshot of counters, queue size and active slots.
    pub fn metrics(&self) -> LimiterMetrics {
        let state = self.inner.lock();
        state.counters.snapshot(state.queue.len(), state.active)
    }

    pub fn queue_size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn active_requests(&self) -> usize {
        self.inner.lock().active
    }
}

/// Counts a request as failed and cancelled when its caller drops it
/// before it settles, e.g. when an enclosing deadline fires.
struct InFlight<'a> {
    inner: &'a Inner,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.inner.lock();
            state.counters.failed += 1;
            state.counters.cancelled += 1;
            debug!("[{}] Request abandoned by its caller", self.inner.name);
        }
    }
}
