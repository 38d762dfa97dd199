//! Health and metrics endpoints.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::super::AppState;
use crate::instances::{InstanceSnapshot, InstanceStatus};
use crate::rate_limiter::{LimiterMetrics, RateLimiter};
use crate::scrapers::PoolStats;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the server started.
    pub uptime: u64,
    pub instances: InstancesHealth,
    pub browser_pool: PoolStats,
}

#[derive(Debug, Serialize)]
pub struct InstancesHealth {
    pub total: usize,
    pub healthy: usize,
    pub instances: Vec<InstanceSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    #[serde(flatten)]
    pub metrics: LimiterMetrics,
    pub queue_size: usize,
}

impl PoolMetrics {
    fn of(limiter: &RateLimiter) -> Self {
        let metrics = limiter.metrics();
        Self {
            queue_size: metrics.current_queue_size,
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub fetch: PoolMetrics,
    pub jobs: PoolMetrics,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.pipeline.registry();
    let instances = registry.snapshot();
    let healthy = instances
        .iter()
        .filter(|i| i.status == InstanceStatus::Healthy)
        .count();

    let status = if instances.is_empty() || healthy > 0 {
        "healthy"
    } else if registry.any_eligible() {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status,
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs(),
        instances: InstancesHealth {
            total: instances.len(),
            healthy,
            instances,
        },
        browser_pool: state.pipeline.source().stats(),
    })
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(MetricsResponse {
        fetch: PoolMetrics::of(state.pipeline.fetch_limiter()),
        jobs: PoolMetrics::of(state.pipeline.job_limiter()),
    })
}
