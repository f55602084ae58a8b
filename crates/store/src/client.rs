//! PostgreSQL pool and row mapping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use pipeline_core::{Error, Job, JobId, JobStatus, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::config::StoreConfig;
use crate::schema::init_schema;

/// Store handle implementing the registry, record and outbox traits.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens the pool and, if configured, creates the schema.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        if config.run_migrations {
            init_schema(&pool).await?;
        }

        info!(max_connections = config.max_connections, "Connected to store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx error to the pipeline taxonomy.
///
/// Connectivity and database errors are `StoreUnavailable`; callers must
/// not assume a partial write succeeded. Row decoding failures are internal.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::Database(db_err) => Error::store(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("unknown")
        )),
        sqlx::Error::PoolClosed => Error::store(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => {
            Error::store(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::Io(e) => Error::store(format!("io error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            Error::internal(format!("failed to decode row in {operation}: {err}"))
        }
        other => Error::store(format!("{operation}: {other}")),
    }
}

/// A write rejected by a unique constraint or index.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

pub(crate) const JOB_COLUMNS: &str =
    "id, file_key, file_name, user_name, period, created_at, finished_at, status, error_message";

#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub id: JobId,
    pub file_key: String,
    pub file_name: String,
    pub user_name: String,
    pub period: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: String,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            file_key: row.file_key,
            file_name: row.file_name,
            user: row.user_name,
            period: row.period,
            created_at: row.created_at,
            finished_at: row.finished_at,
            status: row.status.parse::<JobStatus>()?,
            error_message: row.error_message,
        })
    }
}
