//! Processed data rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Uniqueness key of a processed record across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub product_code: String,
    pub period: String,
}

impl RecordKey {
    pub fn new(product_code: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            product_code: product_code.into(),
            period: period.into(),
        }
    }
}

/// A row accepted by the processing pass, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub product_code: String,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub period: String,
    pub job_id: JobId,
}

impl NewRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.product_code.clone(), self.period.clone())
    }
}

/// A persisted record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedRecord {
    pub id: i64,
    pub product_code: String,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub period: String,
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.product_code.clone(), self.period.clone())
    }
}

/// Filters for the processed data query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub period: Option<String>,
    pub product_code: Option<String>,
    pub limit: Option<u32>,
}

impl RecordFilter {
    /// Blank filter values are treated as absent.
    pub fn normalized(self) -> Self {
        let keep = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            period: keep(self.period),
            product_code: keep(self.product_code),
            limit: self.limit,
        }
    }

    pub fn matches(&self, record: &ProcessedRecord) -> bool {
        self.period.as_ref().map_or(true, |p| *p == record.period)
            && self
                .product_code
                .as_ref()
                .map_or(true, |c| *c == record.product_code)
    }
}
