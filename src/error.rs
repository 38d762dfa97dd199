//! Error taxonomy for scrape jobs.
//!
//! Every failure the pipeline can observe is one of these variants. Attempt
//! level errors are classified once, at the pagination boundary, and the
//! variant decides both retry eligibility and how the health registry and
//! HTTP layer treat it.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while validating, fetching or assembling a scrape job.
#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    /// Bad caller input. Never retried.
    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// The requested profile does not exist on the mirror.
    #[error("User not found: {username}")]
    NotFound { username: String },

    /// Generic failure inside the browser automation layer.
    #[error("Browser error: {message}")]
    Browser { message: String },

    /// Page navigation failed.
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// The page loaded but did not have the expected structure.
    #[error("Failed to parse page ({selector}): {message}")]
    Parsing { selector: String, message: String },

    /// The mirror answered with a throttling notice.
    #[error("Rate limited by {instance}")]
    RateLimited {
        instance: String,
        retry_after: Option<Duration>,
    },

    /// An attempt or a whole job ran past its deadline.
    #[error("{context} timed out after {elapsed:?}")]
    Timeout { context: String, elapsed: Duration },

    /// The registry had no eligible mirror for the next attempt.
    #[error("No healthy instance available ({candidates} candidates)")]
    NoInstance {
        candidates: usize,
        retry_after: Option<Duration>,
    },

    /// Anything else, wrapped with context.
    #[error("{context}: {message}")]
    Unknown { context: String, message: String },
}

/// Coarse classification used by metrics and the health registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Browser, navigation, timeouts and missing instances.
    Transport,
    /// The page shape did not match, likely an upstream layout change.
    Layout,
    /// Upstream throttling.
    Throttled,
    /// Caller mistakes and missing targets.
    Client,
    Other,
}

impl ScrapeError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser {
            message: message.into(),
        }
    }

    pub fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn parsing(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parsing {
            selector: selector.into(),
            message: message.into(),
        }
    }

    pub fn timeout(context: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            elapsed,
        }
    }

    /// Wrap a foreign error with context.
    ///
    /// A `ScrapeError` already carried inside an `anyhow::Error` is returned
    /// unchanged so classification survives `?` through anyhow layers.
    pub fn wrap(context: &str, err: anyhow::Error) -> Self {
        match err.downcast::<ScrapeError>() {
            Ok(inner) => inner,
            Err(other) => Self::Unknown {
                context: context.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Browser { .. } => "BROWSER_ERROR",
            Self::Navigation { .. } => "NAVIGATION_ERROR",
            Self::Parsing { .. } => "PARSING_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::NoInstance { .. } => "NO_INSTANCE",
            Self::Unknown { .. } => "UNKNOWN_ERROR",
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Browser { .. }
            | Self::Navigation { .. }
            | Self::Timeout { .. }
            | Self::NoInstance { .. } => FailureKind::Transport,
            Self::Parsing { .. } => FailureKind::Layout,
            Self::RateLimited { .. } => FailureKind::Throttled,
            Self::Validation { .. } | Self::NotFound { .. } => FailureKind::Client,
            Self::Unknown { .. } => FailureKind::Other,
        }
    }

    /// Whether the rate limiter may run the operation again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::NotFound { .. })
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(e: std::io::Error) -> Self {
        Self::Unknown {
            context: "I/O".to_string(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Unknown {
            context: "Serialization".to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ScrapeError::browser("x").code(), "BROWSER_ERROR");
        assert_eq!(
            ScrapeError::navigation("https://example.com", "x").code(),
            "NAVIGATION_ERROR"
        );
        assert_eq!(ScrapeError::parsing(".timeline", "x").code(), "PARSING_ERROR");
        assert_eq!(
            ScrapeError::validation("username", "x").code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn navigation_error_carries_url() {
        let err = ScrapeError::navigation("https://example.com", "net::ERR_ABORTED");
        match &err {
            ScrapeError::Navigation { url, .. } => assert_eq!(url, "https://example.com"),
            other => panic!("unexpected variant: {:?}", other),
        }
        assert!(err.to_string().contains("https://example.com"));
    }

    #[test]
    fn validation_and_not_found_are_terminal() {
        assert!(!ScrapeError::validation("postsLimit", "too large").is_retryable());
        assert!(!ScrapeError::NotFound {
            username: "ghost".into()
        }
        .is_retryable());
        assert!(ScrapeError::browser("crashed").is_retryable());
        assert!(ScrapeError::timeout("Page fetch", Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn parsing_is_distinguishable_from_transport() {
        assert_eq!(ScrapeError::parsing("a", "b").kind(), FailureKind::Layout);
        assert_eq!(ScrapeError::browser("b").kind(), FailureKind::Transport);
        assert_eq!(
            ScrapeError::RateLimited {
                instance: "https://nitter.example".into(),
                retry_after: None
            }
            .kind(),
            FailureKind::Throttled
        );
    }

    #[test]
    fn wrap_passes_through_known_errors() {
        let inner = ScrapeError::parsing(".show-more", "missing");
        let wrapped = ScrapeError::wrap("Fetching page", anyhow::Error::new(inner));
        assert_eq!(wrapped.code(), "PARSING_ERROR");

        let foreign = ScrapeError::wrap("Fetching page", anyhow::anyhow!("boom"));
        match foreign {
            ScrapeError::Unknown { context, message } => {
                assert_eq!(context, "Fetching page");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
