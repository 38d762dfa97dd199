//! Job pipeline: validate, admit, paginate, assemble, persist.

mod options;
mod result;

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::Settings;
use crate::error::ScrapeError;
use crate::instances::InstanceRegistry;
use crate::pagination::{
    lock_harvest, Harvest, NoProgress, PageRequest, PaginationConfig, PaginationController,
    PaginationState, ProgressSink,
};
use crate::rate_limiter::RateLimiter;
use crate::scrapers::browser::BrowserPageSource;
use crate::scrapers::PageSource;
use crate::storage::{JsonFileStore, ResultStore};
pub use options::{
    validate_username, JobDefaults, JobOptions, OptionParams, MAX_DELAY_MS, MAX_POSTS_LIMIT,
    MAX_RETRIES, MIN_DELAY_MS,
};
pub use result::{JobMetadata, JobResult, JobStatus};

/// Priority of whole jobs in the job pool.
pub const JOB_PRIORITY: u32 = 1;

/// Composes the shared collaborators into per-username jobs.
///
/// Cloning is cheap; every clone shares the same pools, registry and source.
#[derive(Clone)]
pub struct JobPipeline {
    source: Arc<dyn PageSource>,
    registry: InstanceRegistry,
    job_limiter: RateLimiter,
    fetch_limiter: RateLimiter,
    instances: Arc<Vec<String>>,
    pagination: PaginationConfig,
    store: Option<Arc<dyn ResultStore>>,
}

impl JobPipeline {
    pub fn new(
        source: Arc<dyn PageSource>,
        registry: InstanceRegistry,
        job_limiter: RateLimiter,
        fetch_limiter: RateLimiter,
        instances: Vec<String>,
    ) -> Self {
        Self {
            source,
            registry,
            job_limiter,
            fetch_limiter,
            instances: Arc::new(instances),
            pagination: PaginationConfig::default(),
            store: None,
        }
    }

    /// Wire up the browser pool, registry, both limiters and the JSON
    /// result store from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let source = BrowserPageSource::new(settings.browser.clone(), settings.browser_workers);
        let registry =
            InstanceRegistry::with_instances(settings.registry.clone(), &settings.instances);
        Self::new(
            Arc::new(source),
            registry,
            RateLimiter::new("jobs", settings.job_limiter.clone()),
            RateLimiter::new("nitter", settings.fetch_limiter.clone()),
            settings.instances.clone(),
        )
        .with_pagination(settings.pagination.clone())
        .with_store(Arc::new(JsonFileStore::new(&settings.out_dir)))
    }

    pub fn with_pagination(mut self, config: PaginationConfig) -> Self {
        self.pagination = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(&self) -> &dyn PageSource {
        self.source.as_ref()
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn job_limiter(&self) -> &RateLimiter {
        &self.job_limiter
    }

    pub fn fetch_limiter(&self) -> &RateLimiter {
        &self.fetch_limiter
    }

    pub fn instances(&self) -> &[String] {
        &self.instances
    }

    /// Run a job without progress output.
    pub async fn run(&self, username: &str, options: JobOptions) -> Result<JobResult, ScrapeError> {
        self.run_with_progress(username, options, &NoProgress).await
    }

    /// Run a job for `username`.
    ///
    /// Input is validated before any pool is touched. The job holds one
    /// job-pool slot for its whole duration; if the job deadline fires after
    /// some items were collected, those items come back as a partial result.
    pub async fn run_with_progress(
        &self,
        username: &str,
        options: JobOptions,
        progress: &dyn ProgressSink,
    ) -> Result<JobResult, ScrapeError> {
        validate_username(username)?;
        options.validate()?;

        info!(
            "Starting job for @{} (postsLimit={}, delay={:?}, maxRetries={})",
            username, options.posts_limit, options.delay_between_pages, options.max_retries
        );

        let harvest = Mutex::new(Harvest::default());
        let harvest_ref = &harvest;
        let request = PageRequest {
            delay_between_pages: options.delay_between_pages,
            max_retries: options.max_retries,
        };

        // Jobs are never re-run; a failed or timed out job is final.
        let outcome = self
            .job_limiter
            .execute_with_retries(JOB_PRIORITY, 0, || async move {
                let controller = PaginationController {
                    source: self.source.as_ref(),
                    registry: &self.registry,
                    limiter: &self.fetch_limiter,
                    config: &self.pagination,
                    candidates: &self.instances,
                    progress,
                };
                let mut state = PaginationState::new(username, options.posts_limit);
                controller.run(&mut state, request, harvest_ref).await
            })
            .await;

        let harvest = std::mem::take(&mut *lock_harvest(&harvest));

        let status = match outcome {
            Ok(outcome) => {
                if let Some(error) = &outcome.error {
                    warn!("Job for @{} ended early: {}", username, error);
                }
                outcome.status
            }
            Err(ScrapeError::Timeout { elapsed, .. }) if !harvest.items.is_empty() => {
                warn!(
                    "Job for @{} hit its {:?} deadline with {} item(s); returning partial",
                    username,
                    elapsed,
                    harvest.items.len()
                );
                progress.report(&format!(
                    "Job deadline reached, returning partial results ({}/{})",
                    harvest.items.len(),
                    options.posts_limit
                ));
                JobStatus::Partial
            }
            Err(e) => {
                warn!("Job for @{} failed: {}", username, e);
                return Err(e);
            }
        };

        let result = JobResult::from_harvest(harvest, options.posts_limit, status);
        info!(
            "Job for @{} finished: {}/{} item(s), status {}",
            username,
            result.metadata.collected,
            result.metadata.requested,
            status.as_str()
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.store(username, &result).await {
                warn!("Failed to store result for @{}: {}", username, e);
            }
        }

        Ok(result)
    }
}
