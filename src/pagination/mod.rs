//! Pagination control loop for one scrape target.
//!
//! Runs `Fetching -> Evaluating -> Delaying -> Fetching ...` until a stop
//! condition, the page budget or an exhausted fetch ends it in `Done`.
//! Collected items are written into a [`Harvest`] owned by the caller so
//! they survive if the whole job is cancelled by its deadline.

mod delay;
mod stop;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ScrapeError;
use crate::instances::InstanceRegistry;
use crate::job::JobStatus;
use crate::rate_limiter::{RateLimiter, DEFAULT_PRIORITY};
use crate::scrapers::{target_url, PageSource, Profile, ProfileStats, TimelineItem, TimelinePage};
pub use delay::{apply_rate_limit_delay, jittered_delay};
pub use stop::{should_stop, StopReason};

/// Pagination tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Hard upper bound on pages per job.
    pub max_pages: u32,
    /// Jitter as a fraction of the inter-page delay.
    pub jitter_ratio: f64,
    /// Upper bound on the jitter, in milliseconds.
    pub jitter_cap_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_pages: 500,
            jitter_ratio: 0.2,
            jitter_cap_ms: 5_000,
        }
    }
}

/// Receives human-readable progress lines.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _message: &str) {}
}

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetching,
    Evaluating,
    Delaying,
    Done(JobStatus),
}

/// Per-job traversal state.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationState {
    pub username: String,
    pub collected_count: usize,
    pub requested_count: usize,
    pub current_cursor: Option<String>,
    pub attempts_on_current_page: u32,
    pub page_index: u32,
}

impl PaginationState {
    pub fn new(username: impl Into<String>, requested_count: usize) -> Self {
        Self {
            username: username.into(),
            collected_count: 0,
            requested_count,
            current_cursor: None,
            attempts_on_current_page: 0,
            page_index: 0,
        }
    }
}

/// Everything collected so far for one job.
#[derive(Debug, Clone, Default)]
pub struct Harvest {
    pub profile: Option<Profile>,
    pub stats: Option<ProfileStats>,
    pub items: Vec<TimelineItem>,
    /// Instance that served the most recent page.
    pub instance: Option<String>,
    /// Fetch attempts across all pages, including retries.
    pub attempts: u32,
    pub pages: u32,
}

impl Harvest {
    fn absorb(&mut self, page: TimelinePage, instance: String) {
        if self.profile.is_none() {
            self.profile = page.profile;
        }
        if self.stats.is_none() {
            self.stats = page.stats;
        }
        self.items.extend(page.items);
        self.instance = Some(instance);
        self.pages += 1;
    }
}

pub(crate) fn lock_harvest(harvest: &Mutex<Harvest>) -> MutexGuard<'_, Harvest> {
    harvest.lock().unwrap_or_else(|e| e.into_inner())
}

/// How the loop ended.
#[derive(Debug, Clone)]
pub struct PaginationOutcome {
    pub status: JobStatus,
    pub stop_reason: Option<StopReason>,
    /// Set when the loop ended early because a page could not be fetched.
    pub error: Option<ScrapeError>,
}

/// Per-run parameters.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub delay_between_pages: Duration,
    pub max_retries: u32,
}

/// Drives pagination for one job against shared collaborators.
pub struct PaginationController<'a> {
    pub source: &'a dyn PageSource,
    pub registry: &'a InstanceRegistry,
    pub limiter: &'a RateLimiter,
    pub config: &'a PaginationConfig,
    pub candidates: &'a [String],
    pub progress: &'a dyn ProgressSink,
}

impl<'a> PaginationController<'a> {
    /// Run the loop to completion.
    ///
    /// Returns `Err` only when the very first usable page could not be
    /// fetched; later fetch failures end the loop as partial.
    pub async fn run(
        &self,
        state: &mut PaginationState,
        request: PageRequest,
        harvest: &Mutex<Harvest>,
    ) -> Result<PaginationOutcome, ScrapeError> {
        let mut phase = Phase::Fetching;
        let mut fetched: Option<TimelinePage> = None;
        let mut stop_reason = None;
        let mut last_error = None;

        loop {
            debug!("@{} page {} phase {:?}", state.username, state.page_index, phase);
            phase = match phase {
                Phase::Fetching => {
                    if state.page_index >= self.config.max_pages {
                        stop_reason = Some(StopReason::PageBudget);
                        self.report_stop(state, StopReason::PageBudget);
                        Phase::Done(JobStatus::Complete)
                    } else {
                        self.progress.report(&format!(
                            "Fetching page {} for @{} ({}/{})",
                            state.page_index + 1,
                            state.username,
                            state.collected_count,
                            state.requested_count
                        ));
                        match self.fetch(state, request.max_retries, harvest).await {
                            Ok(page) => {
                                fetched = Some(page);
                                Phase::Evaluating
                            }
                            Err(e) if state.collected_count > 0 => {
                                warn!(
                                    "Stopping @{} after fetch failure with {} item(s): {}",
                                    state.username, state.collected_count, e
                                );
                                self.progress.report(&format!(
                                    "Fetch failed, returning partial results ({}/{})",
                                    state.collected_count, state.requested_count
                                ));
                                last_error = Some(e);
                                Phase::Done(JobStatus::Partial)
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                Phase::Evaluating => {
                    let Some(page) = fetched.take() else {
                        return Err(ScrapeError::Unknown {
                            context: "Pagination".to_string(),
                            message: "evaluating without a fetched page".to_string(),
                        });
                    };
                    let previous_cursor = state.current_cursor.clone();
                    let page_items = page.items.len();

                    let decision = should_stop(
                        &page,
                        &state.username,
                        previous_cursor.as_deref(),
                        state.collected_count,
                        state.requested_count,
                    );
                    if decision == Some(StopReason::EmptyPage) {
                        warn!(
                            "@{} page {} was empty but advertised more; stopping",
                            state.username,
                            state.page_index
                        );
                    } else {
                        debug!(
                            "@{} page {} added {} item(s)",
                            state.username, state.page_index, page_items
                        );
                    }

                    match decision {
                        Some(reason) => {
                            stop_reason = Some(reason);
                            self.report_stop(state, reason);
                            Phase::Done(JobStatus::Complete)
                        }
                        None => {
                            state.current_cursor = page.continuation.clone();
                            Phase::Delaying
                        }
                    }
                }
                Phase::Delaying => {
                    apply_rate_limit_delay(
                        request.delay_between_pages,
                        self.config,
                        self.progress,
                        state.collected_count,
                        state.requested_count,
                    )
                    .await;
                    Phase::Fetching
                }
                Phase::Done(status) => {
                    info!(
                        "Pagination for @{} finished: {} item(s) over {} page(s), {:?}",
                        state.username, state.collected_count, state.page_index, status
                    );
                    return Ok(PaginationOutcome {
                        status,
                        stop_reason,
                        error: last_error,
                    });
                }
            };
        }
    }

    /// Fetch the page for the current cursor through the fetch limiter and
    /// fold it into the harvest.
    async fn fetch(
        &self,
        state: &mut PaginationState,
        max_retries: u32,
        harvest: &Mutex<Harvest>,
    ) -> Result<TimelinePage, ScrapeError> {
        let page_attempts = AtomicU32::new(0);
        let attempts = &page_attempts;
        let source = self.source;
        let registry = self.registry;
        let candidates = self.candidates;
        let username = state.username.as_str();
        let cursor = state.current_cursor.clone();
        let attempt_timeout = self.limiter.config().timeout();

        let result = self
            .limiter
            .execute_with_retries(DEFAULT_PRIORITY, max_retries, || {
                let cursor = cursor.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    lock_harvest(harvest).attempts += 1;

                    let lease = registry.lease(candidates)?;
                    let instance = lease.url().to_string();
                    let target = target_url(&instance, username);
                    // Must fire before the limiter's own timeout drops the lease.
                    let result = match tokio::time::timeout(
                        attempt_timeout,
                        source.fetch_page(&target, cursor.as_deref()),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ScrapeError::timeout(
                            format!("fetch from {}", instance),
                            attempt_timeout,
                        )),
                    };
                    lease.complete(&result);
                    result.map(|page| (page, instance))
                }
            })
            .await;

        state.attempts_on_current_page = page_attempts.load(Ordering::SeqCst);
        let (page, instance) = result?;

        // Truncation to the requested count happens when the result is built.
        let collected = {
            let mut harvest = lock_harvest(harvest);
            harvest.absorb(page.clone(), instance);
            harvest.items.len()
        };
        state.collected_count = collected;
        state.page_index += 1;

        Ok(page)
    }

    fn report_stop(&self, state: &PaginationState, reason: StopReason) {
        self.progress.report(&format!(
            "Stopping pagination for @{}: {} ({}/{})",
            state.username, reason, state.collected_count, state.requested_count
        ));
    }
}
