//! Job result document.

use serde::{Deserialize, Serialize};

use crate::pagination::Harvest;
use crate::scrapers::{Profile, ProfileStats, TimelineItem};

/// Final state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Complete,
    Partial,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub requested: usize,
    pub collected: usize,
    pub status: JobStatus,
    /// Instance that served the last page.
    #[serde(rename = "instanceUsed")]
    pub instance: Option<String>,
    /// Page fetch attempts, including retries.
    pub attempts: u32,
}

/// Aggregated timeline for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub profile: Option<Profile>,
    pub stats: Option<ProfileStats>,
    pub tweets: Vec<TimelineItem>,
    pub metadata: JobMetadata,
}

impl JobResult {
    /// Build a result from what pagination collected, keeping at most
    /// `requested` items in page order.
    pub fn from_harvest(harvest: Harvest, requested: usize, status: JobStatus) -> Self {
        let mut tweets = harvest.items;
        tweets.truncate(requested);
        Self {
            profile: harvest.profile,
            stats: harvest.stats,
            metadata: JobMetadata {
                requested,
                collected: tweets.len(),
                status,
                instance: harvest.instance,
                attempts: harvest.attempts,
            },
            tweets,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.metadata.status
    }
}
