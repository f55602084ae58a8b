//! Outbox queries.
//!
//! Rows are claimed with `FOR UPDATE SKIP LOCKED` and a short lease, so
//! relays in several processes never publish the same row concurrently.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::{JobId, OutboxEntry, OutboxId, OutboxMessage, Result};
use sqlx::{FromRow, Postgres, Transaction};

use crate::client::{map_sqlx_error, PgStore};

/// Lease on a claimed row; an unpublished row is claimable again afterwards.
const CLAIM_LEASE_SECS: f64 = 30.0;

#[async_trait]
pub trait Outbox: Send + Sync {
    /// Claim unpublished rows older than `min_age`, oldest first.
    async fn claim_pending(&self, min_age: Duration, limit: u32) -> Result<Vec<OutboxMessage>>;

    /// Mark a row as published. Marking twice is a no-op.
    async fn mark_published(&self, id: OutboxId) -> Result<()>;

    /// Number of unpublished rows.
    async fn pending_count(&self) -> Result<u64>;
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: OutboxId,
    job_id: JobId,
    event_type: String,
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    attempts: i32,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            event_type: row.event_type,
            exchange: row.exchange,
            routing_key: row.routing_key,
            payload: row.payload,
            created_at: row.created_at,
            published_at: row.published_at,
            attempts: row.attempts,
        }
    }
}

/// Insert an outbox row inside the caller's transaction.
pub(crate) async fn insert_outbox_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &OutboxEntry,
) -> Result<OutboxId> {
    sqlx::query_scalar(
        "INSERT INTO outbox (job_id, event_type, exchange, routing_key, payload)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(entry.job_id)
    .bind(&entry.event_type)
    .bind(&entry.exchange)
    .bind(&entry.routing_key)
    .bind(&entry.payload)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_outbox", e))
}

#[async_trait]
impl Outbox for PgStore {
    async fn claim_pending(&self, min_age: Duration, limit: u32) -> Result<Vec<OutboxMessage>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            "UPDATE outbox
             SET attempts = attempts + 1,
                 claimed_until = now() + make_interval(secs => $3)
             WHERE id IN (
                 SELECT id FROM outbox
                 WHERE published_at IS NULL
                   AND created_at <= now() - make_interval(secs => $1)
                   AND (claimed_until IS NULL OR claimed_until < now())
                 ORDER BY id
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, job_id, event_type, exchange, routing_key, payload,
                       created_at, published_at, attempts",
        )
        .bind(min_age.as_secs_f64())
        .bind(i64::from(limit))
        .bind(CLAIM_LEASE_SECS)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("claim_pending", e))?;

        let mut messages: Vec<OutboxMessage> = rows.into_iter().map(Into::into).collect();
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    async fn mark_published(&self, id: OutboxId) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET published_at = now(), claimed_until = NULL
             WHERE id = $1 AND published_at IS NULL",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("mark_published", e))?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
            .fetch_one(self.pool())
            .await
            .map_err(|e| map_sqlx_error("pending_count", e))?;
        Ok(count.max(0) as u64)
    }
}
