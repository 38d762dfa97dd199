//! Timeline scrape endpoint.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::super::AppState;
use super::helpers::ApiError;
use crate::job::{validate_username, JobOptions, JobStatus, OptionParams};

/// `GET /:username` runs one job and returns its result.
///
/// Complete results are 200, partial ones 206.
pub async fn scrape_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(params): Query<OptionParams>,
) -> Result<Response, ApiError> {
    validate_username(&username)?;
    let options = JobOptions::from_params(&params, &state.defaults)?;

    let result = state.pipeline.run(&username, options).await?;
    let status = match result.status() {
        JobStatus::Complete => StatusCode::OK,
        JobStatus::Partial => StatusCode::PARTIAL_CONTENT,
        JobStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(result)).into_response())
}
