//! Page sources and timeline extraction.
//!
//! The pipeline only talks to a [`PageSource`]; the browser-backed
//! implementation lives in [`browser`] and turns rendered HTML into
//! [`TimelinePage`]s through [`extract`].

pub mod browser;
pub mod extract;
mod types;

use async_trait::async_trait;
use url::Url;

use crate::error::ScrapeError;
pub use types::{
    Author, ItemKind, ItemMetrics, PoolStats, Profile, ProfileStats, TimelineItem, TimelinePage,
    Verification,
};

/// Anything that can load one page of a timeline.
///
/// Implementations must tolerate their future being dropped mid-fetch;
/// that is how attempt timeouts cancel work.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch `target_url`, or the continuation `cursor` relative to it.
    async fn fetch_page(
        &self,
        target_url: &str,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, ScrapeError>;

    fn stats(&self) -> PoolStats {
        PoolStats::default()
    }
}

/// Resolve the URL to load for `target_url` and an optional cursor.
///
/// Cursors are path-and-query references, so they resolve against whichever
/// mirror serves the next page.
pub fn page_url(target_url: &str, cursor: Option<&str>) -> Result<String, ScrapeError> {
    let base = Url::parse(target_url)
        .map_err(|e| ScrapeError::navigation(target_url, format!("Invalid URL: {}", e)))?;
    match cursor {
        None => Ok(base.to_string()),
        Some(cursor) => base
            .join(cursor)
            .map(|u| u.to_string())
            .map_err(|e| ScrapeError::navigation(target_url, format!("Invalid cursor: {}", e))),
    }
}

/// Profile URL for `username` on the mirror at `instance`.
pub fn target_url(instance: &str, username: &str) -> String {
    format!("{}/{}", instance.trim_end_matches('/'), username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url() {
        assert_eq!(
            target_url("https://nitter.example/", "jack"),
            "https://nitter.example/jack"
        );
    }

    #[test]
    fn test_page_url_joins_cursor() {
        assert_eq!(
            page_url("https://nitter.example/jack", Some("/jack?cursor=abc123")).unwrap(),
            "https://nitter.example/jack?cursor=abc123"
        );
        assert_eq!(
            page_url("https://nitter.example/jack", Some("?cursor=xyz")).unwrap(),
            "https://nitter.example/jack?cursor=xyz"
        );
        assert_eq!(
            page_url("https://nitter.example/jack", None).unwrap(),
            "https://nitter.example/jack"
        );
    }

    #[test]
    fn test_page_url_rejects_garbage() {
        let err = page_url("not-a-valid-url", None).unwrap_err();
        assert_eq!(err.code(), "NAVIGATION_ERROR");
    }
}
