//! In-memory collaborators.
//!
//! Each implements the same trait as its production counterpart, so the
//! coordinator and workers run their real code paths against them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::EventPublisher;
use bytes::Bytes;
use chrono::Utc;
use file_storage::FileStore;
use history_cache::HistoryCache;
use job_store::{effective_limit, CreatedJob, FinishedJob, JobRegistry, Outbox, RecordStore};
use parking_lot::Mutex;
use pipeline_core::{
    check_period_conflict, Error, Job, JobCreatedEvent, JobFinishedEvent, JobId, JobStatus, JobSummary, NewJob,
    NewRecord, OutboxEntry, OutboxId, OutboxMessage, PipelineEvent, ProcessedRecord, RecordFilter,
    RecordKey, Result,
};
use worker::Mailer;

#[derive(Default)]
struct StoreState {
    jobs: BTreeMap<JobId, Job>,
    /// Every status a job has been written with, in order.
    status_log: BTreeMap<JobId, Vec<JobStatus>>,
    records: Vec<ProcessedRecord>,
    outbox: Vec<OutboxMessage>,
    next_job_id: JobId,
    next_record_id: i64,
    next_outbox_id: OutboxId,
}

impl StoreState {
    fn enqueue(&mut self, entry: OutboxEntry) -> OutboxId {
        self.next_outbox_id += 1;
        let id = self.next_outbox_id;
        self.outbox.push(OutboxMessage {
            id,
            job_id: entry.job_id,
            event_type: entry.event_type,
            exchange: entry.exchange,
            routing_key: entry.routing_key,
            payload: entry.payload,
            created_at: Utc::now(),
            published_at: None,
            attempts: 0,
        });
        id
    }

    fn write_status(
        &mut self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(Job, bool)> {
        let job = self.jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        let changed = job.apply_status(status, error_message, Utc::now())?;
        let job = job.clone();
        if changed {
            self.status_log.entry(id).or_default().push(status);
        }
        Ok((job, changed))
    }
}

/// In-memory job registry, record store and outbox.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    unavailable: Arc<Mutex<bool>>,
    fail_inserts: Arc<Mutex<bool>>,
    fail_finish: Arc<Mutex<bool>>,
    concurrent_insert: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// Record inserts fail with `StoreUnavailable`.
    pub fn set_fail_inserts(&self, fail: bool) {
        *self.fail_inserts.lock() = fail;
    }

    /// Finished/Error writes fail with `StoreUnavailable`.
    pub fn set_fail_finish(&self, fail: bool) {
        *self.fail_finish.lock() = fail;
    }

    /// The next insert batch loses `product_code` to another job that
    /// stores it first.
    pub fn set_concurrent_insert(&self, product_code: &str) {
        *self.concurrent_insert.lock() = Some(product_code.to_string());
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(Error::store("connection refused"));
        }
        Ok(())
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.state.lock().jobs.get(&id).cloned()
    }

    /// Statuses written to a job after creation, in order.
    pub fn status_history(&self, id: JobId) -> Vec<JobStatus> {
        self.state
            .lock()
            .status_log
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn records(&self) -> Vec<ProcessedRecord> {
        self.state.lock().records.clone()
    }

    pub fn records_for_job(&self, id: JobId) -> Vec<ProcessedRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.job_id == id)
            .collect()
    }

    pub fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.lock().outbox.clone()
    }

    /// Insert a job directly, bypassing the coordinator.
    pub fn seed_job(&self, period: &str, status: JobStatus) -> Job {
        let mut state = self.state.lock();
        state.next_job_id += 1;
        let mut job = NewJob {
            file_key: format!("seed-{}", state.next_job_id),
            file_name: "seed.xlsx".to_string(),
            user: "seed@example.com".to_string(),
            period: period.to_string(),
        }
        .into_job(state.next_job_id, Utc::now());
        job.status = status;
        if status.stamps_completion() || status == JobStatus::Notified {
            job.finished_at = Some(Utc::now());
        }
        state.jobs.insert(job.id, job.clone());
        job
    }

    /// Insert a stored record directly.
    pub fn seed_record(&self, code: &str, period: &str, job_id: JobId) {
        let mut state = self.state.lock();
        state.next_record_id += 1;
        let id = state.next_record_id;
        state.records.push(ProcessedRecord {
            id,
            product_code: code.to_string(),
            product_name: "Seed".to_string(),
            price: rust_decimal::Decimal::ONE,
            quantity: 1,
            period: period.to_string(),
            job_id,
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl JobRegistry for MemoryStore {
    async fn create_job(&self, job: NewJob, file_size_in_bytes: i64) -> Result<CreatedJob> {
        self.check()?;
        job.check()?;

        let mut state = self.state.lock();
        let live = state
            .jobs
            .values()
            .filter(|existing| existing.period == job.period && existing.status != JobStatus::Error)
            .max_by_key(|existing| (existing.created_at, existing.id));
        check_period_conflict(live)?;

        state.next_job_id += 1;
        let job = job.into_job(state.next_job_id, Utc::now());
        let event = JobCreatedEvent::for_job(&job, file_size_in_bytes);
        let outbox_id = state.enqueue(OutboxEntry::for_event(&event)?);
        state.jobs.insert(job.id, job.clone());

        Ok(CreatedJob {
            job,
            event,
            outbox_id,
        })
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.check()?;
        Ok(self.job(id))
    }

    async fn get_active_job_for_period(&self, period: &str) -> Result<Option<Job>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .jobs
            .values()
            .filter(|job| job.period == period && job.status != JobStatus::Error)
            .max_by_key(|job| (job.created_at, job.id))
            .cloned())
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job> {
        self.check()?;
        let (job, _) = self.state.lock().write_status(id, status, error_message)?;
        Ok(job)
    }

    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: &str,
        had_errors: bool,
    ) -> Result<FinishedJob> {
        self.check()?;
        if *self.fail_finish.lock() {
            return Err(Error::store("connection reset"));
        }
        if !status.stamps_completion() {
            return Err(Error::internal(format!(
                "finish_job called with non-final status {status}"
            )));
        }

        let mut state = self.state.lock();
        let (job, changed) = state.write_status(id, status, Some(error_message))?;
        let event = JobFinishedEvent::for_job(&job, had_errors);
        let outbox_id = if changed {
            Some(state.enqueue(OutboxEntry::for_event(&event)?))
        } else {
            None
        };

        Ok(FinishedJob {
            job,
            event,
            outbox_id,
        })
    }

    async fn list_summaries(&self) -> Result<Vec<JobSummary>> {
        self.check()?;
        let mut jobs: Vec<Job> = self.state.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(jobs.iter().map(JobSummary::from).collect())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn existing_keys(&self, periods: &[String]) -> Result<HashMap<RecordKey, JobId>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| periods.contains(&r.period))
            .map(|r| (r.key(), r.job_id))
            .collect())
    }

    async fn insert_records(&self, records: &[NewRecord]) -> Result<HashSet<RecordKey>> {
        self.check()?;
        if *self.fail_inserts.lock() {
            return Err(Error::store("insert_records: connection reset"));
        }

        let mut state = self.state.lock();
        if let Some(code) = self.concurrent_insert.lock().take() {
            // Another job stores one of the batch's keys first.
            if let Some(record) = records.iter().find(|r| r.product_code == code) {
                state.next_record_id += 1;
                let id = state.next_record_id;
                state.records.push(ProcessedRecord {
                    id,
                    product_code: record.product_code.clone(),
                    product_name: record.product_name.clone(),
                    price: record.price,
                    quantity: record.quantity,
                    period: record.period.clone(),
                    job_id: record.job_id + 1_000,
                    created_at: Utc::now(),
                });
            }
        }

        let mut inserted = HashSet::new();
        for record in records {
            let key = record.key();
            if state.records.iter().any(|r| r.key() == key) {
                continue;
            }
            state.next_record_id += 1;
            let id = state.next_record_id;
            state.records.push(ProcessedRecord {
                id,
                product_code: record.product_code.clone(),
                product_name: record.product_name.clone(),
                price: record.price,
                quantity: record.quantity,
                period: record.period.clone(),
                job_id: record.job_id,
                created_at: Utc::now(),
            });
            inserted.insert(key);
        }
        Ok(inserted)
    }

    async fn query_records(&self, filter: &RecordFilter) -> Result<Vec<ProcessedRecord>> {
        self.check()?;
        let mut records: Vec<ProcessedRecord> = self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        records.truncate(effective_limit(filter.limit) as usize);
        Ok(records)
    }
}

#[async_trait]
impl Outbox for MemoryStore {
    async fn claim_pending(&self, min_age: Duration, limit: u32) -> Result<Vec<OutboxMessage>> {
        self.check()?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(min_age).map_err(|e| Error::internal(e.to_string()))?;

        let mut state = self.state.lock();
        let claimed = state
            .outbox
            .iter_mut()
            .filter(|m| m.is_pending() && m.created_at <= cutoff)
            .take(limit as usize)
            .map(|m| {
                m.attempts += 1;
                m.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_published(&self, id: OutboxId) -> Result<()> {
        self.check()?;
        if let Some(message) = self.state.lock().outbox.iter_mut().find(|m| m.id == id) {
            message.published_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .outbox
            .iter()
            .filter(|m| m.is_pending())
            .count() as u64)
    }
}

/// One published message.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Publisher that queues messages in memory per exchange.
#[derive(Clone, Default)]
pub struct MockPublisher {
    log: Arc<Mutex<Vec<Published>>>,
    queued: Arc<Mutex<Vec<Published>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure mode for testing error handling.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    /// Every message ever published.
    pub fn published(&self) -> Vec<Published> {
        self.log.lock().clone()
    }

    /// Decoded events of one type, in publish order.
    pub fn events<E: PipelineEvent>(&self) -> Vec<E> {
        self.published()
            .iter()
            .filter(|m| m.exchange == E::ROUTE.exchange)
            .filter_map(|m| E::decode(&m.payload).ok())
            .collect()
    }

    /// Remove and return queued payloads of one event type (simulates a consumer).
    pub fn take<E: PipelineEvent>(&self) -> Vec<Vec<u8>> {
        let mut queued = self.queued.lock();
        let (taken, rest): (Vec<_>, Vec<_>) = queued
            .drain(..)
            .partition(|m| m.exchange == E::ROUTE.exchange);
        *queued = rest;
        taken.into_iter().map(|m| m.payload).collect()
    }
}

#[async_trait]
impl EventPublisher for MockPublisher {
    async fn publish_raw(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        if *self.should_fail.lock() {
            return Err(Error::broker("mock publisher failure"));
        }
        let message = Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        };
        self.log.lock().push(message.clone());
        self.queued.lock().push(message);
        Ok(())
    }
}

/// File store keeping content in memory.
#[derive(Clone, Default)]
pub struct MemoryFileStore {
    files: Arc<Mutex<HashMap<String, Bytes>>>,
    fail_retrieve: Arc<Mutex<bool>>,
    fail_store: Arc<Mutex<bool>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable store on download.
    pub fn set_fail_retrieve(&self, fail: bool) {
        *self.fail_retrieve.lock() = fail;
    }

    /// Simulate an unreachable store on upload.
    pub fn set_fail_store(&self, fail: bool) {
        *self.fail_store.lock() = fail;
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn store(&self, file_name: &str, content: Bytes) -> Result<String> {
        // Uploads are network round trips; let concurrent callers interleave.
        tokio::task::yield_now().await;
        if *self.fail_store.lock() {
            return Err(Error::file_storage("upload failed: connection refused"));
        }
        let mut files = self.files.lock();
        let key = format!("{},{}", files.len() + 1, file_name);
        files.insert(key.clone(), content);
        Ok(key)
    }

    async fn retrieve(&self, file_key: &str) -> Result<Bytes> {
        if *self.fail_retrieve.lock() {
            return Err(Error::file_storage(format!(
                "download {file_key} failed: connection refused"
            )));
        }
        self.files
            .lock()
            .get(file_key)
            .cloned()
            .ok_or_else(|| Error::file_storage(format!("file {file_key} not found")))
    }
}

/// Cache that counts invalidations.
#[derive(Clone, Default)]
pub struct RecordingCache {
    entries: Arc<Mutex<HashMap<String, String>>>,
    invalidations: Arc<Mutex<Vec<String>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    pub fn invalidations(&self) -> Vec<String> {
        self.invalidations.lock().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn check(&self) -> Result<()> {
        if *self.should_fail.lock() {
            return Err(Error::cache("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryCache for RecordingCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.invalidations.lock().push(key.to_string());
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One email handed to the mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub recipient: String,
    pub job_id: JobId,
    pub had_errors: bool,
}

/// Mailer that records what it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, recipient: &str, job_id: JobId, had_errors: bool) -> Result<()> {
        if *self.should_fail.lock() {
            return Err(Error::mail("smtp timeout"));
        }
        self.sent.lock().push(SentEmail {
            recipient: recipient.to_string(),
            job_id,
            had_errors,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_enforces_unique_keys() {
        let store = MemoryStore::new();
        let record = NewRecord {
            product_code: "P-1".into(),
            product_name: "Arroz".into(),
            price: rust_decimal::Decimal::ONE,
            quantity: 1,
            period: "202601".into(),
            job_id: 1,
        };
        let first = store.insert_records(&[record.clone()]).await.unwrap();
        assert!(first.contains(&record.key()));
        assert!(store.insert_records(&[record]).await.unwrap().is_empty());
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn mock_publisher_queues_per_event_type() {
        let publisher = MockPublisher::new();
        publisher
            .publish_raw(JobCreatedEvent::ROUTE.exchange, "r", b"{}")
            .await
            .unwrap();
        publisher
            .publish_raw(JobFinishedEvent::ROUTE.exchange, "r", b"{}")
            .await
            .unwrap();

        assert_eq!(publisher.take::<JobCreatedEvent>().len(), 1);
        assert!(publisher.take::<JobCreatedEvent>().is_empty());
        assert_eq!(publisher.take::<JobFinishedEvent>().len(), 1);
        assert_eq!(publisher.published().len(), 2);
    }
}
