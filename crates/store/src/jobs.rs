//! Job registry.

use async_trait::async_trait;
use pipeline_core::{
    check_period_conflict, Error, Job, JobCreatedEvent, JobFinishedEvent, JobId, JobStatus, JobSummary, NewJob,
    OutboxEntry, OutboxId, Result,
};
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument};

use crate::client::{is_unique_violation, map_sqlx_error, JobRow, PgStore, JOB_COLUMNS};
use crate::outbox::insert_outbox_entry;

/// A job created together with its pending creation event.
#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub job: Job,
    pub event: JobCreatedEvent,
    pub outbox_id: OutboxId,
}

/// A job moved to Finished or Error together with its pending finished event.
#[derive(Debug, Clone)]
pub struct FinishedJob {
    pub job: Job,
    pub event: JobFinishedEvent,
    /// `None` when the job was already in the requested status and no new
    /// event was enqueued.
    pub outbox_id: Option<OutboxId>,
}

/// Persisted jobs and the queries that guard period uniqueness and status
/// transitions.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Insert a Pending job and enqueue its creation event atomically.
    ///
    /// Fails with `PeriodInProcess` or `PeriodAlreadyCompleted` when the
    /// period already has a job outside Error, even if that job was created
    /// after the caller's own check.
    async fn create_job(&self, job: NewJob, file_size_in_bytes: i64) -> Result<CreatedJob>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Most recent job for the period whose status is not Error.
    async fn get_active_job_for_period(&self, period: &str) -> Result<Option<Job>>;

    /// Checked, idempotent status write.
    ///
    /// Finished and Error stamp `finished_at`. Writing the current status
    /// again returns the job unchanged.
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job>;

    /// Move a job to Finished or Error and enqueue its finished event atomically.
    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: &str,
        had_errors: bool,
    ) -> Result<FinishedJob>;

    /// All jobs, newest first.
    async fn list_summaries(&self) -> Result<Vec<JobSummary>>;
}

fn status_names(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Conditional status write. Returns `None` when the row is missing, already
/// in `status`, or in a status that may not move to `status`.
async fn write_status(
    tx: &mut Transaction<'_, Postgres>,
    id: JobId,
    status: JobStatus,
    error_message: Option<&str>,
) -> Result<Option<Job>> {
    let sql = format!(
        "UPDATE jobs
         SET status = $2,
             finished_at = CASE WHEN $3 THEN now() ELSE finished_at END,
             error_message = COALESCE($4, error_message)
         WHERE id = $1 AND status <> $2 AND status = ANY($5)
         RETURNING {JOB_COLUMNS}"
    );

    let row: Option<JobRow> = sqlx::query_as(&sql)
        .bind(id)
        .bind(status.as_str())
        .bind(status.stamps_completion())
        .bind(error_message)
        .bind(status_names(&status.allowed_predecessors()))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

    row.map(Job::try_from).transpose()
}

async fn fetch_job(tx: &mut Transaction<'_, Postgres>, id: JobId) -> Result<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
    let row: Option<JobRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?;
    row.map(Job::try_from).transpose()
}

/// Explain why a conditional write touched no row.
///
/// `Ok(job)` means the job already had the requested status.
async fn resolve_unchanged(
    tx: &mut Transaction<'_, Postgres>,
    id: JobId,
    status: JobStatus,
) -> Result<Job> {
    let current = fetch_job(tx, id).await?.ok_or(Error::JobNotFound(id))?;
    if current.status == status {
        Ok(current)
    } else {
        Err(Error::InvalidTransition {
            job_id: id,
            from: current.status,
            to: status,
        })
    }
}

impl PgStore {
    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>> {
        self.pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

async fn commit(tx: Transaction<'_, Postgres>, operation: &str) -> Result<()> {
    tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
}

#[async_trait]
impl JobRegistry for PgStore {
    #[instrument(skip(self, job), fields(period = %job.period), err)]
    async fn create_job(&self, job: NewJob, file_size_in_bytes: i64) -> Result<CreatedJob> {
        job.check()?;

        let mut tx = self.begin("create_job").await?;

        let sql = format!(
            "INSERT INTO jobs (file_key, file_name, user_name, period, status, error_message)
             VALUES ($1, $2, $3, $4, $5, '')
             RETURNING {JOB_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, JobRow>(&sql)
            .bind(&job.file_key)
            .bind(&job.file_name)
            .bind(&job.user)
            .bind(&job.period)
            .bind(JobStatus::Pending.as_str())
            .fetch_one(&mut *tx)
            .await;
        let row = match inserted {
            Ok(row) => row,
            // Another upload for the period committed after our conflict check.
            Err(e) if is_unique_violation(&e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("create_job", e))?;
                let existing = self.get_active_job_for_period(&job.period).await?;
                check_period_conflict(existing.as_ref())?;
                return Err(map_sqlx_error("create_job", e));
            }
            Err(e) => return Err(map_sqlx_error("create_job", e)),
        };
        let job = Job::try_from(row)?;

        let event = JobCreatedEvent::for_job(&job, file_size_in_bytes);
        let outbox_id = insert_outbox_entry(&mut tx, &OutboxEntry::for_event(&event)?).await?;

        commit(tx, "create_job").await?;

        debug!(job_id = job.id, outbox_id, "Job created");
        Ok(CreatedJob {
            job,
            event,
            outbox_id,
        })
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.map(Job::try_from).transpose()
    }

    async fn get_active_job_for_period(&self, period: &str) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE period = $1 AND status <> $2
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(period)
            .bind(JobStatus::Error.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_sqlx_error("get_active_job_for_period", e))?;
        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self, error_message), fields(status = %status), err)]
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job> {
        let mut tx = self.begin("update_status").await?;
        let job = match write_status(&mut tx, id, status, error_message).await? {
            Some(job) => job,
            None => resolve_unchanged(&mut tx, id, status).await?,
        };
        commit(tx, "update_status").await?;
        Ok(job)
    }

    #[instrument(skip(self, error_message), fields(status = %status), err)]
    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: &str,
        had_errors: bool,
    ) -> Result<FinishedJob> {
        if !status.stamps_completion() {
            return Err(Error::internal(format!(
                "finish_job called with non-final status {status}"
            )));
        }

        let mut tx = self.begin("finish_job").await?;

        let finished = match write_status(&mut tx, id, status, Some(error_message)).await? {
            Some(job) => {
                let event = JobFinishedEvent::for_job(&job, had_errors);
                let outbox_id =
                    insert_outbox_entry(&mut tx, &OutboxEntry::for_event(&event)?).await?;
                FinishedJob {
                    job,
                    event,
                    outbox_id: Some(outbox_id),
                }
            }
            None => {
                let job = resolve_unchanged(&mut tx, id, status).await?;
                let event = JobFinishedEvent::for_job(&job, had_errors);
                FinishedJob {
                    job,
                    event,
                    outbox_id: None,
                }
            }
        };

        commit(tx, "finish_job").await?;
        Ok(finished)
    }

    async fn list_summaries(&self) -> Result<Vec<JobSummary>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC");
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_sqlx_error("list_summaries", e))?;

        rows.into_iter()
            .map(|row| Job::try_from(row).map(|job| JobSummary::from(&job)))
            .collect()
    }
}
