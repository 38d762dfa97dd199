//! HTTP request handlers.

mod api;
mod helpers;
mod scrape;

pub use api::{health, metrics};
pub use helpers::ApiError;
pub use scrape::scrape_user;
