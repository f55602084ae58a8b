//! Job records and the status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};

/// Surrogate job identifier assigned by the store.
pub type JobId = i32;

/// Lifecycle status of an upload job.
///
/// ```text
/// Pending -> InProgress -> {Validated ->} Finished -> Notified
///                       \-> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Validated,
    Finished,
    Notified,
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Validated,
        JobStatus::Finished,
        JobStatus::Notified,
        JobStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Validated => "validated",
            Self::Finished => "finished",
            Self::Notified => "notified",
            Self::Error => "error",
        }
    }

    /// Pending or InProgress: blocks a new upload with `PeriodInProcess`.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Validated, Finished or Notified: blocks a new upload with `PeriodAlreadyCompleted`.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Validated | Self::Finished | Self::Notified)
    }

    /// No automated transition leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Notified | Self::Error)
    }

    /// Writing this status stamps the completion timestamp.
    pub fn stamps_completion(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Whether a status write from `self` to `next` is allowed.
    ///
    /// Writing the current status again is always allowed (idempotent write).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Validated)
                | (InProgress, Finished)
                | (InProgress, JobStatus::Error)
                | (Validated, Finished)
                | (Validated, JobStatus::Error)
                | (Finished, Notified)
        )
    }

    /// Every status from which a write of `self` is allowed, `self` included.
    pub fn allowed_predecessors(&self) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::internal(format!("unknown job status '{s}'")))
    }
}

/// A persisted upload job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub file_key: String,
    pub file_name: String,
    pub user: String,
    pub period: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub error_message: String,
}

impl Job {
    /// Check a status write against the transition table.
    pub fn check_transition(&self, next: JobStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            })
        }
    }

    /// Apply a status write in memory.
    ///
    /// Re-writing the current status leaves the job untouched, so a terminal
    /// job is never re-stamped.
    pub fn apply_status(
        &mut self,
        next: JobStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_transition(next)?;
        if self.status == next {
            return Ok(false);
        }
        self.status = next;
        if next.stamps_completion() {
            self.finished_at = Some(now);
        }
        if let Some(message) = error_message {
            self.error_message = message.to_string();
        }
        Ok(true)
    }
}

/// Attributes of a job about to be created in Pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewJob {
    #[validate(length(min = 1, max = 255))]
    pub file_key: String,
    #[validate(length(min = 1, max = 200))]
    pub file_name: String,
    #[validate(length(min = 1, max = 150))]
    pub user: String,
    #[validate(length(min = 1, max = 10))]
    pub period: String,
}

impl NewJob {
    /// Enforce the column length limits before any write.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(Error::from)
    }

    pub fn into_job(self, id: JobId, created_at: DateTime<Utc>) -> Job {
        Job {
            id,
            file_key: self.file_key,
            file_name: self.file_name,
            user: self.user,
            period: self.period,
            created_at,
            finished_at: None,
            status: JobStatus::Pending,
            error_message: String::new(),
        }
    }
}

/// Reject a new upload when `existing` is the period's live job.
///
/// Active jobs block with `PeriodInProcess`, completed ones with
/// `PeriodAlreadyCompleted`. A job in Error frees the period.
pub fn check_period_conflict(existing: Option<&Job>) -> Result<()> {
    match existing {
        Some(job) if job.status.is_active() => Err(Error::PeriodInProcess {
            period: job.period.clone(),
            status: job.status,
        }),
        Some(job) if job.status.is_completed() => Err(Error::PeriodAlreadyCompleted {
            period: job.period.clone(),
        }),
        _ => Ok(()),
    }
}

/// Read model served by the history and status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub file_name: String,
    pub status: JobStatus,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            file_name: job.file_name.clone(),
            status: job.status,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}
