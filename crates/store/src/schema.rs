//! Table definitions.
//!
//! - `jobs`: one row per upload, status stored as snake_case text; at most
//!   one job per period outside `error`
//! - `processed_records`: unique on (product_code, period) across all jobs
//! - `outbox`: events awaiting publication, removed with their job

use sqlx::PgPool;
use tracing::debug;

use pipeline_core::Result;

use crate::client::map_sqlx_error;

pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id SERIAL PRIMARY KEY,
    file_key VARCHAR(255) NOT NULL,
    file_name VARCHAR(200) NOT NULL,
    user_name VARCHAR(150) NOT NULL,
    period VARCHAR(10) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    finished_at TIMESTAMPTZ,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT NOT NULL DEFAULT ''
)
"#;

pub const CREATE_JOBS_PERIOD_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_period_created
    ON jobs (period, created_at DESC)
"#;

/// One live (non-error) job per period, enforced at insert time.
pub const CREATE_JOBS_LIVE_PERIOD_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS uq_jobs_period_live
    ON jobs (period)
    WHERE status <> 'error'
"#;

pub const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processed_records (
    id BIGSERIAL PRIMARY KEY,
    product_code TEXT NOT NULL,
    product_name TEXT NOT NULL,
    price NUMERIC NOT NULL,
    quantity INTEGER NOT NULL,
    period TEXT NOT NULL,
    job_id INTEGER NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_processed_records_code_period UNIQUE (product_code, period)
)
"#;

pub const CREATE_RECORDS_JOB_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_processed_records_job
    ON processed_records (job_id)
"#;

pub const CREATE_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    id BIGSERIAL PRIMARY KEY,
    job_id INTEGER NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
    event_type TEXT NOT NULL,
    exchange TEXT NOT NULL,
    routing_key TEXT NOT NULL,
    payload BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    published_at TIMESTAMPTZ,
    attempts INTEGER NOT NULL DEFAULT 0,
    claimed_until TIMESTAMPTZ
)
"#;

pub const CREATE_OUTBOX_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_outbox_pending
    ON outbox (created_at)
    WHERE published_at IS NULL
"#;

/// All DDL statements in dependency order.
pub fn all_tables() -> Vec<&'static str> {
    vec![
        CREATE_JOBS_TABLE,
        CREATE_JOBS_PERIOD_INDEX,
        CREATE_JOBS_LIVE_PERIOD_INDEX,
        CREATE_RECORDS_TABLE,
        CREATE_RECORDS_JOB_INDEX,
        CREATE_OUTBOX_TABLE,
        CREATE_OUTBOX_PENDING_INDEX,
    ]
}

/// Initialize database schema.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    for ddl in all_tables() {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("init_schema", e))?;
    }

    debug!("Store schema initialized");
    Ok(())
}
