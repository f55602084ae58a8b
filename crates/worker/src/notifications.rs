//! Notification worker: emails the outcome and finalizes the job.

use std::sync::Arc;

use async_trait::async_trait;
use broker::{EventHandler, HandlerOutcome};
use job_store::JobRegistry;
use pipeline_core::{JobFinishedEvent, JobStatus};
use telemetry::metrics;
use tracing::{debug, info, instrument, warn};

use crate::mailer::Mailer;

/// Consumes JobFinishedEvent.
pub struct NotificationWorker {
    jobs: Arc<dyn JobRegistry>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationWorker {
    pub fn new(jobs: Arc<dyn JobRegistry>, mailer: Arc<dyn Mailer>) -> Self {
        Self { jobs, mailer }
    }

    /// Finished becomes Notified; every other status is left alone.
    async fn finalize(&self, event: &JobFinishedEvent) -> HandlerOutcome {
        let job_id = event.carga_archivo_id;
        let job = match self.jobs.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "Job not found, nothing to finalize");
                return HandlerOutcome::Success;
            }
            Err(e) => {
                warn!(job_id, error = %e, "Failed to load job");
                return HandlerOutcome::RetryableFailure;
            }
        };

        if job.status != JobStatus::Finished {
            debug!(job_id, status = %job.status, "Job status left unchanged");
            return HandlerOutcome::Success;
        }

        match self.jobs.update_status(job_id, JobStatus::Notified, None).await {
            Ok(_) => {
                info!(job_id, "Job notified");
                HandlerOutcome::Success
            }
            Err(e) if e.is_transient() => {
                warn!(job_id, error = %e, "Failed to mark job notified");
                HandlerOutcome::RetryableFailure
            }
            Err(e) => {
                warn!(job_id, error = %e, "Job changed before it could be marked notified");
                HandlerOutcome::Success
            }
        }
    }
}

#[async_trait]
impl EventHandler<JobFinishedEvent> for NotificationWorker {
    #[instrument(skip(self, event), fields(job_id = event.carga_archivo_id))]
    async fn handle(&self, event: JobFinishedEvent) -> HandlerOutcome {
        let job_id = event.carga_archivo_id;

        match event.recipient() {
            Some(recipient) => {
                if let Err(e) = self.mailer.send(recipient, job_id, event.con_errores).await {
                    metrics().notification_errors.inc();
                    warn!(job_id, error = %e, "Outcome email failed");
                    return HandlerOutcome::RetryableFailure;
                }
                metrics().notifications_sent.inc();
            }
            None => debug!(job_id, "No recipient, email skipped"),
        }

        self.finalize(&event).await
    }
}
