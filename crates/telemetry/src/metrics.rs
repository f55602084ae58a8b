//! In-process pipeline counters.
//!
//! Counters live for the lifetime of the process and are logged periodically
//! by the worker scheduler. Each process only moves the counters of the
//! stages it runs; the rest stay at zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Point-in-time value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

/// Upper bounds (ms) of the latency buckets. A whole spreadsheet pass can
/// take tens of seconds, so the range is wider than for request latency.
pub const LATENCY_BOUNDS_MS: [u64; 8] = [5, 25, 100, 250, 1_000, 5_000, 15_000, 60_000];

/// Latency distribution in milliseconds.
#[derive(Debug, Default)]
pub struct Histogram {
    buckets: [AtomicU64; LATENCY_BOUNDS_MS.len()],
    /// Observations above the last bound.
    overflow: AtomicU64,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        match LATENCY_BOUNDS_MS.iter().position(|&bound| ms <= bound) {
            Some(i) => self.buckets[i].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.sum.load(Ordering::Relaxed) as f64 / n as f64,
        }
    }

    /// Smallest bucket bound covering at least `q` of the observations.
    /// `None` when empty or when the quantile falls in the overflow.
    pub fn quantile_bound(&self, q: f64) -> Option<u64> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        let target = (q.clamp(0.0, 1.0) * count as f64).ceil() as u64;
        let mut seen = 0;
        for (bound, bucket) in LATENCY_BOUNDS_MS.iter().zip(&self.buckets) {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target.max(1) {
                return Some(*bound);
            }
        }
        None
    }
}

/// Counters of the three pipeline stages.
#[derive(Debug, Default)]
pub struct Metrics {
    // Gateway
    pub uploads_accepted: Counter,
    pub uploads_rejected: Counter,
    pub upload_latency_ms: Histogram,

    // Processing worker
    pub jobs_processed: Counter,
    pub jobs_failed: Counter,
    /// Deliveries acknowledged without work (job missing or past processing).
    pub jobs_skipped: Counter,
    pub rows_accepted: Counter,
    pub rows_skipped: Counter,
    pub processing_latency_ms: Histogram,

    // Notification worker
    pub notifications_sent: Counter,
    pub notification_errors: Counter,

    // Broker
    pub events_published: Counter,
    pub publish_errors: Counter,
    pub publish_latency_ms: Histogram,
    pub messages_acked: Counter,
    pub messages_requeued: Counter,
    pub messages_dead_lettered: Counter,
    pub messages_in_flight: Gauge,

    // Outbox and cache
    pub outbox_relayed: Counter,
    pub outbox_pending: Gauge,
    pub cache_invalidation_errors: Counter,
}

/// Values of all counters at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uploads_accepted: u64,
    pub uploads_rejected: u64,
    pub upload_latency_mean_ms: f64,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub rows_accepted: u64,
    pub rows_skipped: u64,
    pub processing_latency_mean_ms: f64,
    pub processing_latency_p95_ms: Option<u64>,
    pub notifications_sent: u64,
    pub notification_errors: u64,
    pub events_published: u64,
    pub publish_errors: u64,
    pub messages_acked: u64,
    pub messages_requeued: u64,
    pub messages_dead_lettered: u64,
    pub messages_in_flight: u64,
    pub outbox_relayed: u64,
    pub outbox_pending: u64,
    pub cache_invalidation_errors: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            uploads_accepted: self.uploads_accepted.get(),
            uploads_rejected: self.uploads_rejected.get(),
            upload_latency_mean_ms: self.upload_latency_ms.mean(),
            jobs_processed: self.jobs_processed.get(),
            jobs_failed: self.jobs_failed.get(),
            jobs_skipped: self.jobs_skipped.get(),
            rows_accepted: self.rows_accepted.get(),
            rows_skipped: self.rows_skipped.get(),
            processing_latency_mean_ms: self.processing_latency_ms.mean(),
            processing_latency_p95_ms: self.processing_latency_ms.quantile_bound(0.95),
            notifications_sent: self.notifications_sent.get(),
            notification_errors: self.notification_errors.get(),
            events_published: self.events_published.get(),
            publish_errors: self.publish_errors.get(),
            messages_acked: self.messages_acked.get(),
            messages_requeued: self.messages_requeued.get(),
            messages_dead_lettered: self.messages_dead_lettered.get(),
            messages_in_flight: self.messages_in_flight.get(),
            outbox_relayed: self.outbox_relayed.get(),
            outbox_pending: self.outbox_pending.get(),
            cache_invalidation_errors: self.cache_invalidation_errors.get(),
        }
    }
}

static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::default);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
