//! Pool of browser workers behind the `PageSource` interface.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{BrowserEngineConfig, BrowserFetcher};
use crate::error::ScrapeError;
use crate::scrapers::{extract, page_url, PageSource, PoolStats, TimelinePage};

/// Round-robin pool of browser sessions.
pub struct BrowserPageSource {
    workers: Vec<Arc<Mutex<BrowserFetcher>>>,
    counter: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl BrowserPageSource {
    /// Create `workers` lazily-started sessions sharing one config.
    pub fn new(config: BrowserEngineConfig, workers: usize) -> Self {
        let workers = workers.max(1);
        info!(
            "Created browser pool with {} worker(s) ({})",
            workers,
            config.remote_url.as_deref().unwrap_or("local chrome")
        );
        Self {
            workers: (0..workers)
                .map(|_| Arc::new(Mutex::new(BrowserFetcher::new(config.clone()))))
                .collect(),
            counter: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Next worker in rotation, skipping ahead to an idle one if possible.
    async fn checkout(&self) -> (usize, MutexGuard<'_, BrowserFetcher>) {
        let count = self.workers.len();
        let start = self.counter.fetch_add(1, Ordering::Relaxed) % count;

        for i in 0..count {
            let idx = (start + i) % count;
            if let Ok(guard) = self.workers[idx].try_lock() {
                return (idx, guard);
            }
        }

        (start, self.workers[start].lock().await)
    }
}

#[async_trait]
impl PageSource for BrowserPageSource {
    async fn fetch_page(
        &self,
        target_url: &str,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, ScrapeError> {
        let url = page_url(target_url, cursor)?;
        let (idx, mut worker) = self.checkout().await;
        debug!("Worker {} fetching {}", idx, url);

        let result = match worker.fetch(&url).await {
            Ok(rendered) => extract::parse_timeline(&rendered.content, &rendered.final_url),
            Err(e) => Err(e),
        };
        drop(worker);

        match &result {
            Ok(page) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                debug!("Worker {} extracted {} item(s)", idx, page.items.len());
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Worker {} failed on {}: {}", idx, url, e);
            }
        }
        result
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.workers.len(),
            completed_tasks: self.completed.load(Ordering::Relaxed),
            failed_tasks: self.failed.load(Ordering::Relaxed),
        }
    }
}
