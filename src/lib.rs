//! xacquire - timeline acquisition through Nitter mirrors.
//!
//! A scrape job for one account runs inside a bounded job pool, pages
//! through the account's timeline on whichever mirror the health registry
//! prefers, and throttles every page fetch through a second pool with
//! retries, backoff and per-attempt timeouts.

pub mod cli;
pub mod config;
pub mod error;
pub mod instances;
pub mod job;
pub mod pagination;
pub mod rate_limiter;
pub mod scrapers;
pub mod server;
pub mod storage;

pub use error::ScrapeError;
