//! Timeline domain types.

use serde::{Deserialize, Serialize};

/// Verified badge shown next to a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Blue,
    Business,
}

/// Profile card of the target account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub name: String,
    pub bio: Option<String>,
    pub profile_link: String,
    pub profile_photo_url: Option<String>,
    pub cover_photo_url: Option<String>,
    pub registration_date: Option<String>,
    pub verification: Option<Verification>,
}

/// Counters from the profile card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub tweets: u64,
    pub following: u64,
    pub followers: u64,
    pub likes: u64,
}

/// Author of a timeline item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
    pub name: String,
    pub profile_photo_url: Option<String>,
    pub verification: Option<Verification>,
}

/// Engagement counters of a timeline item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetrics {
    pub comments: u64,
    pub retweets: u64,
    pub quotes: u64,
    pub likes: u64,
    pub views: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Tweet,
    Retweet,
    Quote,
}

/// One entry of a timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub author: Author,
    pub content: String,
    pub url: Option<String>,
    pub created_at: Option<String>,
    pub metrics: ItemMetrics,
    pub kind: ItemKind,
}

/// One fetched page of a timeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelinePage {
    /// Present on pages that render the profile card.
    pub profile: Option<Profile>,
    pub stats: Option<ProfileStats>,
    pub items: Vec<TimelineItem>,
    /// Whether a "load more" affordance is present.
    pub has_more: bool,
    /// Path and query of the continuation link, if the affordance has one.
    pub continuation: Option<String>,
}

/// Counters exposed by a page source for `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub worker_count: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}
