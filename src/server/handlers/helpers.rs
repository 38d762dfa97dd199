//! Error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::ScrapeError;

/// JSON error body: `{"error": ..., "code": ...}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// A [`ScrapeError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ScrapeError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ScrapeError::Validation { .. } => StatusCode::BAD_REQUEST,
            ScrapeError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}
