//! Processed record storage.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::limits::{DEFAULT_RECORD_QUERY_LIMIT, INSERT_CHUNK_SIZE, MAX_RECORD_QUERY_LIMIT};
use pipeline_core::{JobId, NewRecord, ProcessedRecord, RecordFilter, RecordKey, Result};
use rust_decimal::Decimal;
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::debug;

use crate::client::{map_sqlx_error, PgStore};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Owning job of every stored key in the given periods.
    async fn existing_keys(&self, periods: &[String]) -> Result<HashMap<RecordKey, JobId>>;

    /// Insert all records in one transaction, skipping keys that already
    /// exist. Returns the keys actually inserted.
    async fn insert_records(&self, records: &[NewRecord]) -> Result<HashSet<RecordKey>>;

    /// Records matching the filter, newest first.
    async fn query_records(&self, filter: &RecordFilter) -> Result<Vec<ProcessedRecord>>;
}

#[derive(Debug, FromRow)]
struct KeyRow {
    product_code: String,
    period: String,
    job_id: JobId,
}

#[derive(Debug, FromRow)]
struct RecordRow {
    id: i64,
    product_code: String,
    product_name: String,
    price: Decimal,
    quantity: i32,
    period: String,
    job_id: JobId,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for ProcessedRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            product_code: row.product_code,
            product_name: row.product_name,
            price: row.price,
            quantity: row.quantity,
            period: row.period,
            job_id: row.job_id,
            created_at: row.created_at,
        }
    }
}

/// Clamp a requested row count to the query bounds.
pub fn effective_limit(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_RECORD_QUERY_LIMIT)
        .clamp(1, MAX_RECORD_QUERY_LIMIT)
}

#[async_trait]
impl RecordStore for PgStore {
    async fn existing_keys(&self, periods: &[String]) -> Result<HashMap<RecordKey, JobId>> {
        if periods.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<KeyRow> = sqlx::query_as(
            "SELECT product_code, period, job_id FROM processed_records WHERE period = ANY($1)",
        )
        .bind(periods)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("existing_keys", e))?;

        Ok(rows
            .into_iter()
            .map(|row| (RecordKey::new(row.product_code, row.period), row.job_id))
            .collect())
    }

    async fn insert_records(&self, records: &[NewRecord]) -> Result<HashSet<RecordKey>> {
        if records.is_empty() {
            return Ok(HashSet::new());
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_records", e))?;

        let mut inserted = HashSet::with_capacity(records.len());
        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO processed_records (product_code, product_name, price, quantity, period, job_id) ",
            );
            query_builder.push_values(chunk.iter(), |mut b, record| {
                b.push_bind(&record.product_code)
                    .push_bind(&record.product_name)
                    .push_bind(record.price)
                    .push_bind(record.quantity)
                    .push_bind(&record.period)
                    .push_bind(record.job_id);
            });
            query_builder
                .push(" ON CONFLICT (product_code, period) DO NOTHING RETURNING product_code, period");

            let rows: Vec<(String, String)> = query_builder
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_records", e))?;
            inserted.extend(
                rows.into_iter()
                    .map(|(product_code, period)| RecordKey::new(product_code, period)),
            );
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_records", e))?;

        debug!(requested = records.len(), inserted = inserted.len(), "Records inserted");
        Ok(inserted)
    }

    async fn query_records(&self, filter: &RecordFilter) -> Result<Vec<ProcessedRecord>> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, product_code, product_name, price, quantity, period, job_id, created_at
             FROM processed_records WHERE TRUE",
        );
        if let Some(period) = &filter.period {
            query_builder.push(" AND period = ").push_bind(period);
        }
        if let Some(code) = &filter.product_code {
            query_builder.push(" AND product_code = ").push_bind(code);
        }
        query_builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(effective_limit(filter.limit)));

        let rows: Vec<RecordRow> = query_builder
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_sqlx_error("query_records", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
