//! Unified error types for the upload pipeline.
//!
//! Error codes:
//! - JOB_001-004: Job lifecycle errors (period conflicts, lookups, transitions)
//! - STORE_001: Relational store errors
//! - FILE_001-002: File storage and spreadsheet parsing errors
//! - BROKER_001: Message broker errors
//! - CACHE_001: Cache errors
//! - MAIL_001: Email delivery errors

use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Job lifecycle error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorCode {
    /// JOB_001: An active job already exists for the period
    PeriodInProcess,
    /// JOB_002: The period already has a completed job
    PeriodAlreadyCompleted,
    /// JOB_003: Job does not exist
    NotFound,
    /// JOB_004: Status transition not allowed
    InvalidTransition,
}

impl JobErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PeriodInProcess => "JOB_001",
            Self::PeriodAlreadyCompleted => "JOB_002",
            Self::NotFound => "JOB_003",
            Self::InvalidTransition => "JOB_004",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            _ => 409,
        }
    }
}

/// Unified error type for the upload pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("[JOB_001] Ya existe una carga para el periodo '{period}' en estado {status}.")]
    PeriodInProcess { period: String, status: JobStatus },

    #[error("[JOB_002] Ya existe una carga finalizada para el periodo '{period}'. Carga rechazada.")]
    PeriodAlreadyCompleted { period: String },

    #[error("[JOB_003] job {0} not found")]
    JobNotFound(JobId),

    #[error("[JOB_004] job {job_id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("[STORE_001] store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("[FILE_001] file storage error: {0}")]
    FileStorage(String),

    #[error("[FILE_002] could not read spreadsheet: {0}")]
    Parse(String),

    #[error("[BROKER_001] broker error: {0}")]
    Broker(String),

    #[error("[CACHE_001] cache error: {0}")]
    Cache(String),

    #[error("[MAIL_001] email delivery failed: {0}")]
    Mail(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn file_storage(msg: impl Into<String>) -> Self {
        Self::FileStorage(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn mail(msg: impl Into<String>) -> Self {
        Self::Mail(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::PeriodInProcess { .. } => JobErrorCode::PeriodInProcess.http_status(),
            Self::PeriodAlreadyCompleted { .. } => {
                JobErrorCode::PeriodAlreadyCompleted.http_status()
            }
            Self::JobNotFound(_) => JobErrorCode::NotFound.http_status(),
            Self::InvalidTransition { .. } => JobErrorCode::InvalidTransition.http_status(),
            Self::StoreUnavailable(_) => 503,
            Self::FileStorage(_) => 502,
            Self::Parse(_) => 422,
            Self::Broker(_) => 503,
            Self::Cache(_) => 503,
            Self::Mail(_) => 502,
            Self::Validation(_) => 400,
            Self::MalformedEvent(_) => 400,
            Self::Serialization(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::PeriodInProcess { .. } => Some(JobErrorCode::PeriodInProcess.code()),
            Self::PeriodAlreadyCompleted { .. } => {
                Some(JobErrorCode::PeriodAlreadyCompleted.code())
            }
            Self::JobNotFound(_) => Some(JobErrorCode::NotFound.code()),
            Self::InvalidTransition { .. } => Some(JobErrorCode::InvalidTransition.code()),
            Self::StoreUnavailable(_) => Some("STORE_001"),
            Self::FileStorage(_) => Some("FILE_001"),
            Self::Parse(_) => Some("FILE_002"),
            Self::Broker(_) => Some("BROKER_001"),
            Self::Cache(_) => Some("CACHE_001"),
            Self::Mail(_) => Some("MAIL_001"),
            _ => None,
        }
    }

    /// Infrastructure errors that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::Broker(_) | Self::Cache(_) | Self::Mail(_)
        )
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
