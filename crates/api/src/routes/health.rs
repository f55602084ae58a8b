//! Liveness, readiness and dependency health.

use axum::{http::StatusCode, Json};
use telemetry::{health, HealthStatus};

use crate::response::HealthResponse;

fn component_healthy(report: &telemetry::HealthReport, name: &str) -> bool {
    report
        .components
        .iter()
        .any(|c| c.name == name && c.healthy)
}

/// GET /health - last observed state of the broker and the store.
///
/// Always 200; `status` carries healthy, degraded or unhealthy.
pub async fn health_handler() -> Json<HealthResponse> {
    let report = health().report();
    let status = match report.status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        draining: report.draining,
        broker_connected: component_healthy(&report, "broker"),
        store_connected: component_healthy(&report, "store"),
        components: report.components,
    })
}

/// GET /health/ready - 200 while uploads can be registered and announced.
pub async fn ready_handler() -> StatusCode {
    if health().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live
pub async fn live_handler() -> StatusCode {
    if health().is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
