//! PostgreSQL store against a real database.
//!
//! Run with `--ignored`; needs Docker or `PIPELINE_TEST_STORE_URL`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use integration_tests::containers::TestContainers;
use job_store::{JobRegistry, Outbox, PgStore, RecordStore};
use pipeline_core::{
    Error, JobFinishedEvent, JobStatus, NewJob, NewRecord, PipelineEvent, RecordFilter, RecordKey,
};
use rust_decimal::Decimal;

static NEXT_PERIOD: AtomicU32 = AtomicU32::new(0);

/// Distinct period per call so tests can share a database.
fn unique_period(tag: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_subsec_nanos();
    let n = (nanos + NEXT_PERIOD.fetch_add(7_919, Ordering::Relaxed)) % 100_000;
    format!("{tag}{n:05}")
}

fn new_job(period: &str) -> NewJob {
    NewJob {
        file_key: format!("1,{period}"),
        file_name: "ventas.xlsx".to_string(),
        user: "ana@example.com".to_string(),
        period: period.to_string(),
    }
}

fn record(code: &str, period: &str, job_id: i32) -> NewRecord {
    NewRecord {
        product_code: code.to_string(),
        product_name: "Arroz".to_string(),
        price: Decimal::new(1250, 2),
        quantity: 3,
        period: period.to_string(),
        job_id,
    }
}

async fn store() -> (TestContainers, PgStore) {
    let containers = TestContainers::start().await;
    let store = containers.store().await;
    (containers, store)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn job_lifecycle_writes_outbox_rows_with_status_changes() {
    let (_containers, store) = store().await;
    let period = unique_period("J");

    let created = store.create_job(new_job(&period), 2048).await.unwrap();
    assert_eq!(created.job.status, JobStatus::Pending);
    assert_eq!(created.event.file_size_in_bytes, 2048);

    let active = store.get_active_job_for_period(&period).await.unwrap();
    assert_eq!(active.map(|j| j.id), Some(created.job.id));

    store
        .update_status(created.job.id, JobStatus::InProgress, None)
        .await
        .unwrap();
    let finished = store
        .finish_job(created.job.id, JobStatus::Finished, "", false)
        .await
        .unwrap();
    assert!(finished.job.finished_at.is_some());
    assert!(finished.outbox_id.is_some());

    // A second finish is an idempotent write: no new outbox row.
    let again = store
        .finish_job(created.job.id, JobStatus::Finished, "", false)
        .await
        .unwrap();
    assert!(again.outbox_id.is_none());
    assert_eq!(again.job.finished_at, finished.job.finished_at);

    let pending = store.claim_pending(Duration::ZERO, 1000).await.unwrap();
    let ours: Vec<_> = pending
        .iter()
        .filter(|m| m.job_id == created.job.id)
        .collect();
    assert_eq!(ours.len(), 2);

    let finished_row = ours
        .iter()
        .find(|m| m.event_type == JobFinishedEvent::NAME)
        .unwrap();
    let event = JobFinishedEvent::decode(&finished_row.payload).unwrap();
    assert_eq!(event.carga_archivo_id, created.job.id);

    for message in ours {
        store.mark_published(message.id).await.unwrap();
    }
    let pending = store.claim_pending(Duration::ZERO, 1000).await.unwrap();
    assert!(pending.iter().all(|m| m.job_id != created.job.id));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn insert_rejects_a_second_live_job_for_the_period() {
    let (_containers, store) = store().await;
    let period = unique_period("P");

    let first = store.create_job(new_job(&period), 1).await.unwrap().job;
    let err = store.create_job(new_job(&period), 1).await.unwrap_err();
    assert!(matches!(err, Error::PeriodInProcess { .. }), "{err}");

    // Error frees the period.
    store
        .update_status(first.id, JobStatus::InProgress, None)
        .await
        .unwrap();
    store
        .finish_job(first.id, JobStatus::Error, "download failed", true)
        .await
        .unwrap();
    let retry = store.create_job(new_job(&period), 1).await.unwrap().job;

    store
        .update_status(retry.id, JobStatus::InProgress, None)
        .await
        .unwrap();
    store
        .finish_job(retry.id, JobStatus::Finished, "", false)
        .await
        .unwrap();
    let err = store.create_job(new_job(&period), 1).await.unwrap_err();
    assert!(matches!(err, Error::PeriodAlreadyCompleted { .. }), "{err}");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn invalid_transitions_are_rejected() {
    let (_containers, store) = store().await;
    let created = store
        .create_job(new_job(&unique_period("T")), 1)
        .await
        .unwrap();

    let err = store
        .finish_job(created.job.id, JobStatus::Finished, "", false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }), "{err}");

    let err = store
        .update_status(999_999, JobStatus::InProgress, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::JobNotFound(999_999)), "{err}");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn duplicate_record_keys_are_ignored() {
    let (_containers, store) = store().await;
    let period = unique_period("R");
    let job = store.create_job(new_job(&period), 1).await.unwrap().job;

    let inserted = store
        .insert_records(&[
            record("P-001", &period, job.id),
            record("P-002", &period, job.id),
        ])
        .await
        .unwrap();
    assert_eq!(inserted.len(), 2);

    let inserted = store
        .insert_records(&[
            record("P-001", &period, job.id),
            record("P-003", &period, job.id),
        ])
        .await
        .unwrap();
    assert_eq!(
        inserted,
        HashSet::from([RecordKey::new("P-003", period.as_str())]),
        "only the new key is returned"
    );

    let keys = store.existing_keys(&[period.clone()]).await.unwrap();
    assert_eq!(keys.len(), 3);
    assert_eq!(keys.get(&RecordKey::new("P-001", period.as_str())), Some(&job.id));

    let rows = store
        .query_records(&RecordFilter {
            period: Some(period.clone()),
            product_code: Some("P-002".to_string()),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].price, Decimal::new(1250, 2));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn summaries_are_newest_first() {
    let (_containers, store) = store().await;
    let first = store
        .create_job(new_job(&unique_period("S")), 1)
        .await
        .unwrap()
        .job;
    let second = store
        .create_job(new_job(&unique_period("S")), 1)
        .await
        .unwrap()
        .job;

    let summaries = store.list_summaries().await.unwrap();
    let first_pos = summaries.iter().position(|s| s.id == first.id).unwrap();
    let second_pos = summaries.iter().position(|s| s.id == second.id).unwrap();
    assert!(second_pos < first_pos);
}
