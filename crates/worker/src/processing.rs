//! Processing worker: turns an uploaded spreadsheet into processed records.
//!
//! Per JobCreatedEvent:
//! 1. Load the job; absent or already past processing is acknowledged as-is
//! 2. Mark it InProgress
//! 3. Download, parse and deduplicate the file
//! 4. Bulk insert accepted rows
//! 5. Finish the job (Finished or Error) and publish JobFinishedEvent

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use broker::{EventHandler, EventPublisher, HandlerOutcome};
use file_storage::FileStore;
use history_cache::HistoryCache;
use job_store::{JobRegistry, Outbox, RecordStore};
use pipeline_core::limits::HISTORY_CACHE_KEY;
use pipeline_core::{Error, Job, JobCreatedEvent, JobId, JobStatus, NewRecord, RecordKey, Result};
use telemetry::metrics;
use tracing::{debug, error, info, instrument, warn};

use crate::dedup::{skip_summary, DedupIndex, RowVerdict, SkipReason};
use crate::parser::parse_upload;
use crate::relay::publish_committed;

/// Outcome of one successful processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub rows: usize,
    pub inserted: u64,
    /// Rows stored by an earlier attempt of the same job.
    pub already_stored: usize,
    /// Skip messages, one per excluded row.
    pub skips: Vec<String>,
}

impl ProcessReport {
    pub fn skipped(&self) -> usize {
        self.skips.len()
    }

    pub fn summary(&self) -> String {
        skip_summary(self.skipped())
    }
}

/// Skip messages for accepted rows whose key a concurrent job stored first.
fn lost_row_skips(
    row_numbers: &[u32],
    accepted: &[NewRecord],
    inserted: &HashSet<RecordKey>,
) -> Vec<String> {
    row_numbers
        .iter()
        .zip(accepted)
        .filter(|(_, record)| !inserted.contains(&record.key()))
        .map(|(row_number, _)| SkipReason::DuplicateInStore.message(*row_number))
        .collect()
}

/// Map a store error to a handler outcome.
///
/// Infrastructure errors are retried; a job that vanished or moved on under
/// us needs no further work.
fn store_outcome(job_id: JobId, err: &Error) -> HandlerOutcome {
    match err {
        e if e.is_transient() => {
            warn!(job_id, error = %e, "Store unavailable, message will be retried");
            HandlerOutcome::RetryableFailure
        }
        Error::JobNotFound(_) | Error::InvalidTransition { .. } => {
            warn!(job_id, error = %err, "Job changed concurrently, dropping message");
            HandlerOutcome::Success
        }
        e => {
            error!(job_id, error = %e, "Unrecoverable store error");
            HandlerOutcome::FatalFailure
        }
    }
}

/// Consumes JobCreatedEvent.
pub struct ProcessingWorker {
    jobs: Arc<dyn JobRegistry>,
    records: Arc<dyn RecordStore>,
    outbox: Arc<dyn Outbox>,
    files: Arc<dyn FileStore>,
    cache: Arc<dyn HistoryCache>,
    publisher: Arc<dyn EventPublisher>,
}

impl ProcessingWorker {
    pub fn new(
        jobs: Arc<dyn JobRegistry>,
        records: Arc<dyn RecordStore>,
        outbox: Arc<dyn Outbox>,
        files: Arc<dyn FileStore>,
        cache: Arc<dyn HistoryCache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            jobs,
            records,
            outbox,
            files,
            cache,
            publisher,
        }
    }

    /// Download, parse, deduplicate and insert.
    async fn process(&self, job: &Job) -> Result<ProcessReport> {
        let content = self.files.retrieve(&job.file_key).await?;

        let file_name = job.file_name.clone();
        let period = job.period.clone();
        let rows = tokio::task::spawn_blocking(move || parse_upload(&file_name, &content, &period))
            .await
            .map_err(|e| Error::internal(format!("parser task failed: {e}")))??;

        let periods: Vec<String> = rows
            .iter()
            .filter(|row| row.is_valid())
            .map(|row| row.period.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let stored = self.records.existing_keys(&periods).await?;
        let mut index = DedupIndex::new(job.id, stored);

        let mut report = ProcessReport {
            rows: rows.len(),
            ..Default::default()
        };
        let mut accepted = Vec::new();
        let mut accepted_rows = Vec::new();
        for row in &rows {
            match index.check(row) {
                RowVerdict::Accept => {
                    accepted_rows.push(row.row_number);
                    accepted.push(NewRecord {
                        product_code: row.product_code.clone(),
                        product_name: row.product_name.clone(),
                        price: row.price,
                        quantity: row.quantity,
                        period: row.period.clone(),
                        job_id: job.id,
                    });
                }
                RowVerdict::AlreadyStored => report.already_stored += 1,
                RowVerdict::Skip(reason) => {
                    let message = reason.message(row.row_number);
                    warn!(job_id = job.id, row = row.row_number, "{}", message);
                    report.skips.push(message);
                }
            }
        }

        let inserted = self.records.insert_records(&accepted).await?;
        report.inserted = inserted.len() as u64;

        for message in lost_row_skips(&accepted_rows, &accepted, &inserted) {
            warn!(job_id = job.id, "{}", message);
            report.skips.push(message);
        }

        if report.inserted > 0 {
            self.invalidate_history().await;
        }

        Ok(report)
    }

    async fn invalidate_history(&self) {
        if let Err(e) = self.cache.invalidate(HISTORY_CACHE_KEY).await {
            metrics().cache_invalidation_errors.inc();
            warn!(error = %e, "Failed to invalidate job history cache");
        }
    }

    /// Write the final status and publish the finished event.
    async fn finish(
        &self,
        job: &Job,
        status: JobStatus,
        message: &str,
        had_errors: bool,
    ) -> Result<()> {
        let finished = self
            .jobs
            .finish_job(job.id, status, message, had_errors)
            .await?;
        publish_committed(
            self.publisher.as_ref(),
            self.outbox.as_ref(),
            finished.outbox_id,
            &finished.event,
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl EventHandler<JobCreatedEvent> for ProcessingWorker {
    #[instrument(skip(self, event), fields(job_id = event.carga_archivo_id))]
    async fn handle(&self, event: JobCreatedEvent) -> HandlerOutcome {
        let started = Instant::now();
        let job_id = event.carga_archivo_id;

        let job = match self.jobs.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "Job not found, dropping message");
                metrics().jobs_skipped.inc();
                return HandlerOutcome::Success;
            }
            Err(e) => return store_outcome(job_id, &e),
        };

        if !job.status.is_active() {
            info!(job_id, status = %job.status, "Job already processed, skipping");
            metrics().jobs_skipped.inc();
            return HandlerOutcome::Success;
        }

        if let Err(e) = self
            .jobs
            .update_status(job_id, JobStatus::InProgress, None)
            .await
        {
            return store_outcome(job_id, &e);
        }
        debug!(job_id, file_key = %job.file_key, "Processing started");

        let outcome = match self.process(&job).await {
            Ok(report) => {
                let summary = report.summary();
                let had_errors = report.skipped() > 0;
                match self
                    .finish(&job, JobStatus::Finished, &summary, had_errors)
                    .await
                {
                    Ok(()) => {
                        metrics().jobs_processed.inc();
                        metrics().rows_accepted.inc_by(report.inserted);
                        metrics().rows_skipped.inc_by(report.skipped() as u64);
                        info!(
                            job_id,
                            rows = report.rows,
                            inserted = report.inserted,
                            already_stored = report.already_stored,
                            skipped = report.skipped(),
                            "Job finished"
                        );
                        HandlerOutcome::Success
                    }
                    Err(e) => store_outcome(job_id, &e),
                }
            }
            Err(failure) => {
                let message = failure.to_string();
                error!(job_id, error = %message, "Job processing failed");
                match self.finish(&job, JobStatus::Error, &message, true).await {
                    Ok(()) => {
                        metrics().jobs_failed.inc();
                        HandlerOutcome::FatalFailure
                    }
                    Err(e) => store_outcome(job_id, &e),
                }
            }
        };

        metrics()
            .processing_latency_ms
            .observe(started.elapsed().as_millis() as u64);
        outcome
    }
}
