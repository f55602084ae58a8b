//! HTTP surface of the ingestion gateway.

use api::response::{ErrorResponse, UploadResponse};
use api::GatewayConfig;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use integration_tests::fixtures::{self, Row};
use integration_tests::setup::Pipeline;
use pipeline_core::limits::HISTORY_CACHE_KEY;
use pipeline_core::{JobStatus, JobSummary, ProcessedRecord};

fn upload_form(period: &str, content: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_part("file", Part::bytes(content).file_name("ventas.xlsx"))
        .add_text("periodo", period.to_string())
        .add_text("usuario", "ana@example.com")
}

fn workbook(period: &str) -> Vec<u8> {
    fixtures::xlsx(&[
        Row::valid("P-001", "Arroz", 12.5, 3.0, period),
        Row::valid("P-002", "Azucar", 8.0, 1.0, period),
    ])
}

#[tokio::test]
async fn upload_is_accepted_with_202() {
    let pipeline = Pipeline::new();
    let server = pipeline.server();

    let response = server
        .post("/api/cargas")
        .multipart(upload_form("202601", workbook("202601")))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: UploadResponse = response.json();
    assert!(body.success);
    assert_eq!(body.status, JobStatus::Pending);
    assert_eq!(pipeline.store.job(body.id).unwrap().user, "ana@example.com");
}

#[tokio::test]
async fn period_conflict_is_409_with_code() {
    let pipeline = Pipeline::new();
    let server = pipeline.server();
    server
        .post("/api/cargas")
        .multipart(upload_form("202601", workbook("202601")))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let response = server
        .post("/api/cargas")
        .multipart(upload_form("202601", workbook("202601")))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: ErrorResponse = response.json();
    assert!(!body.success);
    assert_eq!(body.code, "JOB_001");
    assert!(body.error.contains("202601"));
}

#[tokio::test]
async fn completed_period_is_409_with_its_own_code() {
    let pipeline = Pipeline::new();
    pipeline.store.seed_job("202601", JobStatus::Finished);

    let response = pipeline
        .server()
        .post("/api/cargas")
        .multipart(upload_form("202601", workbook("202601")))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<ErrorResponse>().code, "JOB_002");
}

#[tokio::test]
async fn missing_fields_are_400() {
    let pipeline = Pipeline::new();
    let server = pipeline.server();

    let no_period = MultipartForm::new()
        .add_part("file", Part::bytes(workbook("202601")).file_name("ventas.xlsx"))
        .add_text("usuario", "ana@example.com");
    let response = server.post("/api/cargas").multipart(no_period).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<ErrorResponse>().code, "VALID_001");

    let no_file = MultipartForm::new()
        .add_text("periodo", "202601")
        .add_text("usuario", "ana@example.com");
    server
        .post("/api/cargas")
        .multipart(no_file)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_file_is_413() {
    let pipeline = Pipeline::new();
    let server = pipeline.server_with(GatewayConfig {
        max_upload_bytes: 16,
        ..GatewayConfig::default()
    });

    let response = server
        .post("/api/cargas")
        .multipart(upload_form("202601", vec![b'x'; 64]))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.json::<ErrorResponse>().code, "VALID_002");
    assert_eq!(pipeline.files.file_count(), 0);
}

#[tokio::test]
async fn history_lists_jobs_newest_first_and_is_cached() {
    let pipeline = Pipeline::new();
    let server = pipeline.server();
    let first = pipeline
        .upload("a.xlsx", "202601", workbook("202601"))
        .await
        .unwrap();
    let second = pipeline
        .upload("b.xlsx", "202602", workbook("202602"))
        .await
        .unwrap();

    let response = server.get("/api/cargas/historial").await;
    response.assert_status_ok();
    let history: Vec<JobSummary> = response.json();
    let ids: Vec<_> = history.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert!(pipeline.cache.contains(HISTORY_CACHE_KEY));

    // Processing invalidates the cached history.
    pipeline.run_to_completion().await;
    assert!(!pipeline.cache.contains(HISTORY_CACHE_KEY));

    let history: Vec<JobSummary> = server.get("/api/cargas/historial").await.json();
    assert!(history.iter().all(|j| j.status == JobStatus::Notified));
}

#[tokio::test]
async fn history_falls_back_to_the_store_when_the_cache_fails() {
    let pipeline = Pipeline::new();
    pipeline
        .upload("a.xlsx", "202601", workbook("202601"))
        .await
        .unwrap();
    pipeline.cache.set_should_fail(true);

    let response = pipeline.server().get("/api/cargas/historial").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Vec<JobSummary>>().len(), 1);
}

#[tokio::test]
async fn job_status_is_served_and_unknown_jobs_are_404() {
    let pipeline = Pipeline::new();
    let server = pipeline.server();
    let job = pipeline
        .upload("a.xlsx", "202601", workbook("202601"))
        .await
        .unwrap();

    let response = server.get(&format!("/api/cargas/{}", job.id)).await;
    response.assert_status_ok();
    let summary: JobSummary = response.json();
    assert_eq!(summary.id, job.id);
    assert_eq!(summary.status, JobStatus::Pending);
    assert_eq!(summary.file_name, "a.xlsx");

    let response = server.get("/api/cargas/9999").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<ErrorResponse>().code, "JOB_003");
}

#[tokio::test]
async fn processed_data_is_filtered_by_period_and_code() {
    let pipeline = Pipeline::new();
    let server = pipeline.server();
    pipeline
        .upload("a.xlsx", "202601", workbook("202601"))
        .await
        .unwrap();
    pipeline
        .upload("b.xlsx", "202602", workbook("202602"))
        .await
        .unwrap();
    pipeline.run_to_completion().await;

    let all: Vec<ProcessedRecord> = server.get("/api/data").await.json();
    assert_eq!(all.len(), 4);

    let january: Vec<ProcessedRecord> = server
        .get("/api/data")
        .add_query_param("periodo", "202601")
        .await
        .json();
    assert_eq!(january.len(), 2);
    assert!(january.iter().all(|r| r.period == "202601"));

    let one: Vec<ProcessedRecord> = server
        .get("/api/data")
        .add_query_param("periodo", "202602")
        .add_query_param("codigo", "P-001")
        .await
        .json();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].product_name, "Arroz");

    let limited: Vec<ProcessedRecord> = server
        .get("/api/data")
        .add_query_param("limit", 1)
        .await
        .json();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn health_endpoint_reports_components() {
    let pipeline = Pipeline::new();

    let response = pipeline.server().get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body.get("status").is_some());
    assert!(body.get("components").is_some());
}

#[tokio::test]
async fn unknown_routes_are_404_json() {
    let pipeline = Pipeline::new();

    let response = pipeline.server().get("/api/unknown").await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<ErrorResponse>().code, "NOT_FOUND");
}
