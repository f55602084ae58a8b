//! Transactional outbox rows.
//!
//! An event is written to the outbox in the same transaction as the status
//! change that caused it, then published and marked. Rows still pending after
//! a grace period are republished by the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::PipelineEvent;
use crate::job::JobId;

/// Outbox row identifier.
pub type OutboxId = i64;

/// An event ready to be stored in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub job_id: JobId,
    pub event_type: String,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl OutboxEntry {
    pub fn for_event<E: PipelineEvent>(event: &E) -> Result<Self> {
        Ok(Self {
            job_id: event.job_id(),
            event_type: E::NAME.to_string(),
            exchange: E::ROUTE.exchange.to_string(),
            routing_key: E::ROUTE.routing_key.to_string(),
            payload: event.encode()?,
        })
    }
}

/// A stored outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxId,
    pub job_id: JobId,
    pub event_type: String,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
}

impl OutboxMessage {
    pub fn is_pending(&self) -> bool {
        self.published_at.is_none()
    }
}
