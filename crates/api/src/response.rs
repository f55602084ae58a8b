//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pipeline_core::{Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use telemetry::ComponentHealthReport;

/// Response for an accepted upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub success: bool,
}

impl From<&Job> for UploadResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            success: true,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Shutdown in progress; readiness is withdrawn.
    pub draining: bool,
    pub broker_connected: bool,
    pub store_connected: bool,
    pub components: Vec<ComponentHealthReport>,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

/// API error carrying the pipeline error code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "VALID_001", msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<pipeline_core::Error> for ApiError {
    fn from(err: pipeline_core::Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match err.error_code() {
            Some(code) => code,
            None if status == StatusCode::BAD_REQUEST => "VALID_001",
            None => "INTERNAL",
        };
        ApiError::with_code(status, code, err.to_string())
    }
}
