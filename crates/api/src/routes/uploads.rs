//! Upload and query endpoints.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use pipeline_core::{JobId, JobSummary, ProcessedRecord, RecordFilter};
use serde::Deserialize;
use tracing::debug;

use crate::coordinator::UploadRequest;
use crate::response::{ApiError, UploadResponse};
use crate::state::AppState;

/// POST /api/cargas - multipart upload with `file`, `periodo` and `usuario`.
///
/// Returns 202 once the job is registered; processing happens asynchronously.
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut period = None;
    let mut user = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("could not read file: {e}")))?;
                file = Some((file_name, content));
            }
            "periodo" => period = Some(read_text(field).await?),
            "usuario" => user = Some(read_text(field).await?),
            other => debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    let (file_name, content) = file.ok_or_else(|| ApiError::bad_request("file is required"))?;
    if content.len() > state.config.max_upload_bytes {
        return Err(ApiError::with_code(
            StatusCode::PAYLOAD_TOO_LARGE,
            "VALID_002",
            format!(
                "file size {} bytes exceeds {} bytes limit",
                content.len(),
                state.config.max_upload_bytes
            ),
        ));
    }
    let period = period.ok_or_else(|| ApiError::bad_request("periodo is required"))?;
    let user = user.ok_or_else(|| ApiError::bad_request("usuario is required"))?;

    let job = state
        .coordinator
        .submit_upload(UploadRequest::new(file_name, user, period, content))
        .await?;

    Ok((StatusCode::ACCEPTED, Json(UploadResponse::from(&job))))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid form field: {e}")))
}

/// GET /api/cargas/historial - all jobs, newest first.
pub async fn history_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    Ok(Json(state.history.job_history().await?))
}

/// GET /api/cargas/:id - one job's status.
pub async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<JobSummary>, ApiError> {
    Ok(Json(state.history.job_status(id).await?))
}

/// Query string of GET /api/data.
#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    pub periodo: Option<String>,
    pub codigo: Option<String>,
    pub limit: Option<u32>,
}

/// GET /api/data - processed records, newest first.
pub async fn data_handler(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Vec<ProcessedRecord>>, ApiError> {
    let filter = RecordFilter {
        period: query.periodo,
        product_code: query.codigo,
        limit: query.limit,
    };
    Ok(Json(state.history.processed_records(filter).await?))
}
