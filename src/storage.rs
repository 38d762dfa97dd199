//! Persistence of finished job results.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::job::JobResult;

/// Destination for finished results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn store(&self, username: &str, result: &JobResult) -> anyhow::Result<()>;
}

/// Writes each result to `<dir>/<username>.json`, replacing earlier runs.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path a result for `username` is written to.
    pub fn path_for(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{}.json", username))
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn store(&self, username: &str, result: &JobResult) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(username);
        let json = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(&path, json).await?;
        debug!("Wrote {} item(s) to {}", result.tweets.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::pagination::Harvest;
    use crate::scrapers::TimelineItem;
    use tempfile::TempDir;

    fn result(n: usize) -> JobResult {
        JobResult::from_harvest(
            Harvest {
                items: vec![TimelineItem::default(); n],
                ..Default::default()
            },
            10,
            JobStatus::Complete,
        )
    }

    #[tokio::test]
    async fn test_writes_pretty_json_and_creates_dir() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("out"));

        store.store("someone", &result(3)).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("out/someone.json")).unwrap();
        assert!(written.contains('\n'));
        let parsed: JobResult = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.tweets.len(), 3);
        assert_eq!(parsed.metadata.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_overwrites_previous_result() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.store("someone", &result(5)).await.unwrap();
        store.store("someone", &result(2)).await.unwrap();

        let parsed: JobResult =
            serde_json::from_slice(&std::fs::read(store.path_for("someone")).unwrap()).unwrap();
        assert_eq!(parsed.tweets.len(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = JsonFileStore::new(blocker.join("nested"));

        assert!(store.store("someone", &result(1)).await.is_err());
    }
}
