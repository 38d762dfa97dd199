//! End-to-end job scenarios against scripted page sources.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use xacquire::instances::{InstanceRegistry, InstanceStatus, RegistryConfig};
use xacquire::job::{JobDefaults, JobOptions, JobPipeline, JobResult, JobStatus, OptionParams};
use xacquire::rate_limiter::{NoopObserver, RateLimiter, RateLimiterConfig};
use xacquire::scrapers::{PageSource, TimelineItem, TimelinePage};
use xacquire::storage::JsonFileStore;
use xacquire::ScrapeError;

const A: &str = "https://a.example";
const B: &str = "https://b.example";

enum Reply {
    Page(TimelinePage),
    Fail(ScrapeError),
    Hang,
}

/// Replies are queued per instance and consumed in order.
#[derive(Default)]
struct Scripted {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl Scripted {
    fn push(&self, instance: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(instance.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for Scripted {
    async fn fetch_page(
        &self,
        target_url: &str,
        _cursor: Option<&str>,
    ) -> Result<TimelinePage, ScrapeError> {
        self.calls.lock().unwrap().push(target_url.to_string());
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            replies
                .iter_mut()
                .find(|(instance, _)| target_url.starts_with(instance.as_str()))
                .and_then(|(_, queue)| queue.pop_front())
        };
        match reply {
            Some(Reply::Page(page)) => Ok(page),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(ScrapeError::browser("no scripted reply")),
        }
    }
}

/// Deterministic timeline: `pages` pages of `per_page` items, addressed by
/// `?cursor=<n>`.
struct Timeline {
    pages: usize,
    per_page: usize,
}

#[async_trait]
impl PageSource for Timeline {
    async fn fetch_page(
        &self,
        _target_url: &str,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, ScrapeError> {
        let index = cursor
            .and_then(|c| c.rsplit('=').next())
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        Ok(page(
            index,
            self.per_page,
            (index + 1 < self.pages).then(|| format!("/someone?cursor={}", index + 1)),
        ))
    }
}

fn page(index: usize, items: usize, next: Option<String>) -> TimelinePage {
    TimelinePage {
        items: (0..items)
            .map(|i| TimelineItem {
                content: format!("page {} item {}", index, i),
                ..Default::default()
            })
            .collect(),
        has_more: next.is_some(),
        continuation: next,
        ..Default::default()
    }
}

fn fetch_config() -> RateLimiterConfig {
    RateLimiterConfig {
        retry_delay_ms: 10,
        ..RateLimiterConfig::fetch_pool()
    }
}

fn pipeline(
    source: Arc<dyn PageSource>,
    instances: &[&str],
    job_config: RateLimiterConfig,
) -> JobPipeline {
    pipeline_with(source, instances, job_config, fetch_config())
}

fn pipeline_with(
    source: Arc<dyn PageSource>,
    instances: &[&str],
    job_config: RateLimiterConfig,
    fetch_config: RateLimiterConfig,
) -> JobPipeline {
    let instances: Vec<String> = instances.iter().map(|s| s.to_string()).collect();
    JobPipeline::new(
        source,
        InstanceRegistry::with_instances(RegistryConfig::default(), &instances),
        RateLimiter::with_observer("jobs", job_config, Arc::new(NoopObserver)),
        RateLimiter::with_observer("nitter", fetch_config, Arc::new(NoopObserver)),
        instances,
    )
}

fn options(posts_limit: usize) -> JobOptions {
    JobOptions {
        posts_limit,
        delay_between_pages: Duration::from_millis(1000),
        max_retries: 3,
    }
}

#[tokio::test(start_paused = true)]
async fn small_limit_completes_from_first_page() {
    let source = Arc::new(Timeline {
        pages: 10,
        per_page: 20,
    });
    let pipeline = pipeline(source, &[A], RateLimiterConfig::job_pool());

    let result = pipeline.run("someone", options(10)).await.unwrap();

    assert_eq!(result.status(), JobStatus::Complete);
    assert_eq!(result.tweets.len(), 10);
    assert_eq!(result.metadata.requested, 10);
    assert_eq!(result.metadata.collected, 10);
    assert_eq!(result.metadata.instance.as_deref(), Some(A));
    assert_eq!(result.tweets[0].content, "page 0 item 0");
    assert_eq!(pipeline.fetch_limiter().metrics().total_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_instance_fails_over() {
    let source = Arc::new(Scripted::default());
    for _ in 0..5 {
        source.push(
            A,
            Reply::Fail(ScrapeError::RateLimited {
                instance: A.to_string(),
                retry_after: None,
            }),
        );
    }
    source
        .push(B, Reply::Fail(ScrapeError::browser("tab crashed")))
        .push(B, Reply::Fail(ScrapeError::navigation(B, "reset")))
        .push(B, Reply::Page(page(0, 10, None)));

    let pipeline = pipeline(source.clone(), &[A, B], RateLimiterConfig::job_pool());
    let result = pipeline.run("someone", options(50)).await.unwrap();

    assert_eq!(result.status(), JobStatus::Complete);
    assert_eq!(result.metadata.attempts, 4);
    assert_eq!(result.metadata.collected, 10);
    assert_eq!(result.metadata.instance.as_deref(), Some(B));

    let calls = source.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[0].starts_with(A));
    assert!(calls[1..].iter().all(|c| c.starts_with(B)));

    let registry = pipeline.registry();
    assert_eq!(registry.get(A).unwrap().status, InstanceStatus::RateLimited);
    let b = registry.get(B).unwrap();
    assert_eq!(b.status, InstanceStatus::Healthy);
    assert_eq!(b.consecutive_failures, 0);

    let metrics = pipeline.fetch_limiter().metrics();
    assert_eq!(metrics.retried_requests, 3);
    assert_eq!(metrics.successful_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn job_deadline_returns_collected_items() {
    let source = Arc::new(Scripted::default());
    source
        .push(A, Reply::Page(page(0, 20, Some("/someone?cursor=1".into()))))
        .push(A, Reply::Page(page(1, 17, Some("/someone?cursor=2".into()))))
        .push(A, Reply::Hang);

    let job_config = RateLimiterConfig {
        timeout_ms: 10_000,
        ..RateLimiterConfig::job_pool()
    };
    let pipeline = pipeline(source, &[A], job_config);
    let result = pipeline.run("someone", options(100)).await.unwrap();

    assert_eq!(result.status(), JobStatus::Partial);
    assert_eq!(result.metadata.collected, 37);
    assert_eq!(result.metadata.requested, 100);
    assert_eq!(result.tweets[20].content, "page 1 item 0");

    let jobs = pipeline.job_limiter().metrics();
    assert_eq!(jobs.failed_requests, 1);
    assert_eq!(jobs.active_requests, 0);

    // The hung fetch was abandoned by the job deadline, not by its own
    // timeout: it is counted, and the mirror is not charged for it.
    let fetch = pipeline.fetch_limiter().metrics();
    assert_eq!(fetch.total_requests, 3);
    assert_eq!(fetch.successful_requests, 2);
    assert_eq!(fetch.failed_requests, 1);
    assert_eq!(fetch.cancelled_requests, 1);
    assert_eq!(
        fetch.total_requests,
        fetch.successful_requests + fetch.failed_requests
    );
    assert_eq!(fetch.active_requests, 0);
    let a = pipeline.registry().get(A).unwrap();
    assert_eq!(a.status, InstanceStatus::Healthy);
    assert_eq!(a.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn counters_balance_across_repeated_partial_jobs() {
    let source = Arc::new(Scripted::default());
    for _ in 0..3 {
        source
            .push(A, Reply::Page(page(0, 20, Some("/someone?cursor=1".into()))))
            .push(A, Reply::Hang);
    }
    let job_config = RateLimiterConfig {
        timeout_ms: 10_000,
        ..RateLimiterConfig::job_pool()
    };
    let pipeline = pipeline(source, &[A], job_config);

    for _ in 0..3 {
        let result = pipeline.run("someone", options(100)).await.unwrap();
        assert_eq!(result.status(), JobStatus::Partial);
        assert_eq!(result.metadata.collected, 20);
    }

    let fetch = pipeline.fetch_limiter().metrics();
    assert_eq!(fetch.total_requests, 6);
    assert_eq!(fetch.successful_requests, 3);
    assert_eq!(fetch.failed_requests, 3);
    assert_eq!(fetch.cancelled_requests, 3);
    assert_eq!(fetch.retried_requests, 0);
    assert_eq!(pipeline.registry().get(A).unwrap().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_charges_the_mirror_and_fails_over() {
    let source = Arc::new(Scripted::default());
    source
        .push(A, Reply::Hang)
        .push(B, Reply::Page(page(0, 10, None)));

    let fetch = RateLimiterConfig {
        timeout_ms: 5_000,
        ..fetch_config()
    };
    let pipeline = pipeline_with(source, &[A, B], RateLimiterConfig::job_pool(), fetch);
    let result = pipeline.run("someone", options(50)).await.unwrap();

    assert_eq!(result.status(), JobStatus::Complete);
    assert_eq!(result.metadata.attempts, 2);
    assert_eq!(result.metadata.instance.as_deref(), Some(B));

    let a = pipeline.registry().get(A).unwrap();
    assert_eq!(a.consecutive_failures, 1);
    let metrics = pipeline.fetch_limiter().metrics();
    assert_eq!(metrics.retried_requests, 1);
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.cancelled_requests, 0);
    assert_eq!(metrics.failures_by_kind.transport, 1);
}

#[tokio::test(start_paused = true)]
async fn layout_failures_are_reported_apart_from_transport() {
    let source = Arc::new(Scripted::default());
    source
        .push(A, Reply::Fail(ScrapeError::parsing(".timeline", "missing")))
        .push(A, Reply::Page(page(0, 5, None)));
    let pipeline = pipeline(source, &[A], RateLimiterConfig::job_pool());

    let result = pipeline.run("someone", options(50)).await.unwrap();
    assert_eq!(result.metadata.collected, 5);

    let failures = pipeline.fetch_limiter().metrics().failures_by_kind;
    assert_eq!(failures.layout, 1);
    assert_eq!(failures.transport, 0);
}

#[tokio::test(start_paused = true)]
async fn fatal_error_without_items_is_an_error() {
    let source = Arc::new(Scripted::default());
    for _ in 0..4 {
        source.push(A, Reply::Fail(ScrapeError::parsing(".timeline", "missing")));
    }
    let pipeline = pipeline(source, &[A], RateLimiterConfig::job_pool());

    let err = pipeline.run("someone", options(50)).await.unwrap_err();
    assert_eq!(err.code(), "PARSING_ERROR");
    assert_eq!(
        pipeline.registry().get(A).unwrap().status,
        InstanceStatus::Unhealthy
    );
}

#[tokio::test(start_paused = true)]
async fn out_of_range_limits_are_rejected_before_any_pool() {
    let pipeline = pipeline(
        Arc::new(Timeline {
            pages: 1,
            per_page: 20,
        }),
        &[A],
        RateLimiterConfig::job_pool(),
    );

    for raw in ["0", "10000"] {
        let params = OptionParams {
            posts_limit: Some(raw.to_string()),
            ..Default::default()
        };
        let err = JobOptions::from_params(&params, &JobDefaults::default()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
    for limit in [0, 10_000] {
        let err = pipeline.run("someone", options(limit)).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    assert_eq!(pipeline.job_limiter().metrics().total_requests, 0);
    assert_eq!(pipeline.fetch_limiter().metrics().total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_jobs_produce_the_same_result_file() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let pipeline = pipeline(
        Arc::new(Timeline {
            pages: 3,
            per_page: 20,
        }),
        &[A],
        RateLimiterConfig::job_pool(),
    )
    .with_store(store.clone());

    let first = pipeline.run("someone", options(45)).await.unwrap();
    let first_file = std::fs::read(store.path_for("someone")).unwrap();
    let second = pipeline.run("someone", options(45)).await.unwrap();
    let second_file = std::fs::read(store.path_for("someone")).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_file, second_file);
    assert_eq!(first.tweets.len(), 45);

    let stored: JobResult = serde_json::from_slice(&second_file).unwrap();
    assert_eq!(stored.metadata.collected, 45);
    assert_eq!(stored.tweets[44].content, "page 2 item 4");
}
