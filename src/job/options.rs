//! Job options and input validation.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// Largest accepted `postsLimit`.
pub const MAX_POSTS_LIMIT: usize = 5_000;
/// Accepted `delayBetweenPages` range, in milliseconds.
pub const MIN_DELAY_MS: u64 = 1_000;
pub const MAX_DELAY_MS: u64 = 30_000;
/// Largest accepted per-page retry budget.
pub const MAX_RETRIES: u32 = 10;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("valid regex"));

/// Reject anything that is not a plausible account handle.
pub fn validate_username(username: &str) -> Result<(), ScrapeError> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err(ScrapeError::validation(
            "username",
            "must be 1-15 letters, digits or underscores",
        ))
    }
}

/// Defaults applied when a request omits an option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub posts_limit: usize,
    pub delay_between_pages_ms: u64,
    pub max_retries: u32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            posts_limit: 100,
            delay_between_pages_ms: 3_000,
            max_retries: 3,
        }
    }
}

/// Raw, unparsed options as they arrive from a query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionParams {
    pub posts_limit: Option<String>,
    pub delay_between_pages: Option<String>,
    pub max_retries: Option<String>,
}

/// Validated options for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub posts_limit: usize,
    pub delay_between_pages: Duration,
    pub max_retries: u32,
}

impl From<&JobDefaults> for JobOptions {
    fn from(defaults: &JobDefaults) -> Self {
        Self {
            posts_limit: defaults.posts_limit,
            delay_between_pages: Duration::from_millis(defaults.delay_between_pages_ms),
            max_retries: defaults.max_retries,
        }
    }
}

impl JobOptions {
    /// Parse and validate raw parameters, filling gaps from `defaults`.
    pub fn from_params(params: &OptionParams, defaults: &JobDefaults) -> Result<Self, ScrapeError> {
        let mut options = Self::from(defaults);

        if let Some(raw) = non_empty(&params.posts_limit) {
            let value = parse_int("postsLimit", raw)?;
            options.posts_limit = usize::try_from(value).map_err(|_| {
                ScrapeError::validation(
                    "postsLimit",
                    format!("must be between 1 and {}", MAX_POSTS_LIMIT),
                )
            })?;
        }
        if let Some(raw) = non_empty(&params.delay_between_pages) {
            let value = parse_int("delayBetweenPages", raw)?;
            let ms = u64::try_from(value).map_err(|_| {
                ScrapeError::validation(
                    "delayBetweenPages",
                    format!("must be between {} and {} ms", MIN_DELAY_MS, MAX_DELAY_MS),
                )
            })?;
            options.delay_between_pages = Duration::from_millis(ms);
        }
        if let Some(raw) = non_empty(&params.max_retries) {
            let value = parse_int("maxRetries", raw)?;
            options.max_retries = u32::try_from(value).map_err(|_| {
                ScrapeError::validation(
                    "maxRetries",
                    format!("must be between 0 and {}", MAX_RETRIES),
                )
            })?;
        }

        options.validate()?;
        Ok(options)
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.posts_limit == 0 || self.posts_limit > MAX_POSTS_LIMIT {
            return Err(ScrapeError::validation(
                "postsLimit",
                format!("must be between 1 and {}", MAX_POSTS_LIMIT),
            ));
        }
        let delay_ms = self.delay_between_pages.as_millis();
        if delay_ms < MIN_DELAY_MS as u128 || delay_ms > MAX_DELAY_MS as u128 {
            return Err(ScrapeError::validation(
                "delayBetweenPages",
                format!("must be between {} and {} ms", MIN_DELAY_MS, MAX_DELAY_MS),
            ));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ScrapeError::validation(
                "maxRetries",
                format!("must be between 0 and {}", MAX_RETRIES),
            ));
        }
        Ok(())
    }
}

fn non_empty(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_int(field: &'static str, raw: &str) -> Result<i64, ScrapeError> {
    raw.parse::<i64>()
        .map_err(|_| ScrapeError::validation(field, format!("'{}' is not an integer", raw)))
}
