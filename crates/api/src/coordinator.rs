//! Upload coordination.
//!
//! Order of effects for an accepted upload:
//! 1. period conflict check
//! 2. file stored (failure leaves no job behind)
//! 3. job row + outbox row committed together; the store repeats the
//!    period check at insert, so concurrent uploads admit one job
//! 4. creation event published, outbox row marked
//! 5. job history cache invalidated

use std::sync::Arc;
use std::time::Instant;

use broker::{publish_event, EventPublisher};
use bytes::Bytes;
use file_storage::FileStore;
use history_cache::HistoryCache;
use job_store::{CreatedJob, JobRegistry, Outbox};
use pipeline_core::limits::HISTORY_CACHE_KEY;
use pipeline_core::{check_period_conflict, Error, Job, NewJob, Result};
use telemetry::metrics;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// A file submitted for processing.
#[derive(Debug, Clone, Validate)]
pub struct UploadRequest {
    #[validate(length(min = 1, max = 200))]
    pub file_name: String,
    #[validate(length(min = 1, max = 150))]
    pub user: String,
    #[validate(length(min = 1, max = 10))]
    pub period: String,
    pub content: Bytes,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        user: impl Into<String>,
        period: impl Into<String>,
        content: Bytes,
    ) -> Self {
        Self {
            file_name: file_name.into().trim().to_string(),
            user: user.into().trim().to_string(),
            period: period.into().trim().to_string(),
            content,
        }
    }

    fn check(&self) -> Result<()> {
        self.validate()?;
        if self.content.is_empty() {
            return Err(Error::validation("file is empty"));
        }
        Ok(())
    }
}

/// Accepts uploads and starts their processing.
pub struct IngestionCoordinator {
    jobs: Arc<dyn JobRegistry>,
    outbox: Arc<dyn Outbox>,
    files: Arc<dyn FileStore>,
    cache: Arc<dyn HistoryCache>,
    publisher: Arc<dyn EventPublisher>,
}

impl IngestionCoordinator {
    pub fn new(
        jobs: Arc<dyn JobRegistry>,
        outbox: Arc<dyn Outbox>,
        files: Arc<dyn FileStore>,
        cache: Arc<dyn HistoryCache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            jobs,
            outbox,
            files,
            cache,
            publisher,
        }
    }

    /// Submit an upload. Returns the Pending job.
    #[instrument(skip(self, request), fields(period = %request.period, file_name = %request.file_name))]
    pub async fn submit_upload(&self, request: UploadRequest) -> Result<Job> {
        let started = Instant::now();
        let result = self.submit(request).await;

        match &result {
            Ok(job) => {
                metrics().uploads_accepted.inc();
                info!(job_id = job.id, "Upload accepted");
            }
            Err(e) => {
                metrics().uploads_rejected.inc();
                warn!(error = %e, "Upload rejected");
            }
        }
        metrics()
            .upload_latency_ms
            .observe(started.elapsed().as_millis() as u64);
        result
    }

    async fn submit(&self, request: UploadRequest) -> Result<Job> {
        request.check()?;

        let existing = self.jobs.get_active_job_for_period(&request.period).await?;
        check_period_conflict(existing.as_ref())?;

        let file_size = request.content.len() as i64;
        let file_key = self
            .files
            .store(&request.file_name, request.content)
            .await?;
        debug!(file_key = %file_key, file_size, "File stored");

        let CreatedJob {
            job,
            event,
            outbox_id,
        } = self
            .jobs
            .create_job(
                NewJob {
                    file_key,
                    file_name: request.file_name,
                    user: request.user,
                    period: request.period,
                },
                file_size,
            )
            .await?;

        match publish_event(self.publisher.as_ref(), &event).await {
            Ok(()) => {
                if let Err(e) = self.outbox.mark_published(outbox_id).await {
                    warn!(job_id = job.id, outbox_id, error = %e, "Failed to mark outbox row published");
                }
            }
            Err(e) => warn!(
                job_id = job.id,
                outbox_id,
                error = %e,
                "Immediate publish failed, leaving event to the relay"
            ),
        }

        if let Err(e) = self.cache.invalidate(HISTORY_CACHE_KEY).await {
            metrics().cache_invalidation_errors.inc();
            warn!(error = %e, "Failed to invalidate job history cache");
        }

        Ok(job)
    }
}
