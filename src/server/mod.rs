//! HTTP front-end.
//!
//! Exposes one job per `GET /:username` plus `/health` and `/metrics`
//! views over the shared pipeline.

mod handlers;
mod routes;

pub use handlers::ApiError;
pub use routes::create_router;

use std::time::Instant;

use crate::config::Settings;
use crate::job::{JobDefaults, JobPipeline};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: JobPipeline,
    /// Applied to options a request leaves out.
    pub defaults: JobDefaults,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: JobPipeline, defaults: JobDefaults) -> Self {
        Self {
            pipeline,
            defaults,
            started_at: Instant::now(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(JobPipeline::from_settings(settings), settings.defaults.clone())
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::from_settings(settings);
    tracing::info!(
        "Serving {} instance(s) with {} browser worker(s)",
        state.pipeline.instances().len(),
        settings.browser_workers
    );
    let app = create_router(state);

    tracing::info!("Starting server at http://{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
