//! Outbox relay.
//!
//! Actors publish an event right after committing its outbox row. The relay
//! picks up rows whose immediate publish never happened (crash, broker
//! outage) and republishes them.

use std::sync::Arc;
use std::time::Duration;

use broker::{publish_event, publish_outbox, EventPublisher};
use job_store::Outbox;
use pipeline_core::{OutboxId, PipelineEvent, Result};
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Poll interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Grace period before a pending row is considered abandoned
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
    /// Rows claimed per poll
    #[serde(default = "default_batch")]
    pub batch: u32,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_min_age_secs() -> u64 {
    10
}

fn default_batch() -> u32 {
    100
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            min_age_secs: default_min_age_secs(),
            batch: default_batch(),
        }
    }
}

/// Publish an event whose outbox row was just committed, then mark the row.
///
/// Failures are logged only: the row stays pending and the relay retries it.
pub async fn publish_committed<E: PipelineEvent>(
    publisher: &dyn EventPublisher,
    outbox: &dyn Outbox,
    outbox_id: Option<OutboxId>,
    event: &E,
) {
    let Some(outbox_id) = outbox_id else {
        return;
    };

    if let Err(e) = publish_event(publisher, event).await {
        warn!(
            event = E::NAME,
            job_id = event.job_id(),
            outbox_id,
            error = %e,
            "Immediate publish failed, leaving event to the relay"
        );
        return;
    }

    if let Err(e) = outbox.mark_published(outbox_id).await {
        warn!(outbox_id, error = %e, "Failed to mark outbox row published");
    }
}

/// Republishes abandoned outbox rows.
pub struct OutboxRelay {
    outbox: Arc<dyn Outbox>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn Outbox>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            config,
        }
    }

    /// One relay pass. Returns the number of rows published.
    ///
    /// Stops at the first publish failure; unpublished rows stay pending.
    pub async fn run_once(&self) -> Result<usize> {
        let claimed = self
            .outbox
            .claim_pending(Duration::from_secs(self.config.min_age_secs), self.config.batch)
            .await?;

        let mut relayed = 0;
        for message in &claimed {
            if let Err(e) = publish_outbox(self.publisher.as_ref(), message).await {
                warn!(
                    outbox_id = message.id,
                    job_id = message.job_id,
                    event = %message.event_type,
                    error = %e,
                    "Relay publish failed"
                );
                break;
            }
            self.outbox.mark_published(message.id).await?;
            relayed += 1;
            debug!(outbox_id = message.id, job_id = message.job_id, "Outbox row relayed");
        }

        if relayed > 0 {
            metrics().outbox_relayed.inc_by(relayed as u64);
            info!(relayed, claimed = claimed.len(), "Relayed pending events");
        }

        let pending = self.outbox.pending_count().await?;
        metrics().outbox_pending.set(pending);

        Ok(relayed)
    }

    /// Poll forever.
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_millis(self.config.interval_ms));
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!("Outbox relay error: {}", e);
            }
        }
    }
}
