//! Gateway routes.
//!
//! `/api/*` is the upload and query surface; `/health*` are the probes.

pub mod health;
pub mod uploads;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::response::ApiError;
use crate::state::AppState;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

fn api_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/api/cargas",
            post(uploads::upload_handler)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD_BYTES)),
        )
        .route("/api/cargas/historial", get(uploads::history_handler))
        .route("/api/cargas/:id", get(uploads::status_handler))
        .route("/api/data", get(uploads::data_handler))
}

fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
}

async fn not_found() -> ApiError {
    ApiError::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found")
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_routes(state.config.max_upload_bytes)
        .merge(health_routes())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
