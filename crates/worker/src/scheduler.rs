//! Background tasks shared by every process: the outbox relay and the
//! periodic metrics log.

use std::sync::Arc;
use std::time::Duration;

use telemetry::{metrics, MetricsSnapshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::relay::OutboxRelay;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub metrics_log_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            metrics_log_interval: Duration::from_secs(60),
        }
    }
}

/// Owns the background tasks of one process.
pub struct WorkerScheduler {
    config: SchedulerConfig,
    relay: Option<Arc<OutboxRelay>>,
}

impl WorkerScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            relay: None,
        }
    }

    pub fn with_relay(mut self, relay: Arc<OutboxRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Spawn the tasks. They run until the runtime shuts down.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        if let Some(relay) = self.relay {
            handles.push(tokio::spawn(async move { relay.run().await }));
            info!("Outbox relay started");
        }

        let period = self.config.metrics_log_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_snapshot(&metrics().snapshot());
            }
        }));

        handles
    }
}

/// One line per stage, so a process only shows numbers for what it runs.
fn log_snapshot(s: &MetricsSnapshot) {
    if s.uploads_accepted + s.uploads_rejected > 0 {
        info!(
            accepted = s.uploads_accepted,
            rejected = s.uploads_rejected,
            latency_mean_ms = s.upload_latency_mean_ms,
            "Upload metrics"
        );
    }
    if s.jobs_processed + s.jobs_failed + s.jobs_skipped > 0 {
        info!(
            processed = s.jobs_processed,
            failed = s.jobs_failed,
            skipped = s.jobs_skipped,
            rows_accepted = s.rows_accepted,
            rows_skipped = s.rows_skipped,
            latency_mean_ms = s.processing_latency_mean_ms,
            latency_p95_ms = ?s.processing_latency_p95_ms,
            "Processing metrics"
        );
    }
    if s.notifications_sent + s.notification_errors > 0 {
        info!(
            sent = s.notifications_sent,
            errors = s.notification_errors,
            "Notification metrics"
        );
    }
    info!(
        published = s.events_published,
        publish_errors = s.publish_errors,
        acked = s.messages_acked,
        requeued = s.messages_requeued,
        dead_lettered = s.messages_dead_lettered,
        in_flight = s.messages_in_flight,
        outbox_relayed = s.outbox_relayed,
        outbox_pending = s.outbox_pending,
        cache_invalidation_errors = s.cache_invalidation_errors,
        "Broker metrics"
    );
}
