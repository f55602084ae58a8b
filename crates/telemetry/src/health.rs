//! Component health shared by the probes and the gateway health endpoints.
//!
//! Every pipeline process depends on the broker (events) and the relational
//! store (job rows, outbox). Probes record each check here; the gateway
//! reports the last observation per component.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Overall status derived from the components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Default)]
struct Observation {
    healthy: bool,
    message: Option<String>,
    checked_at: Option<DateTime<Utc>>,
}

/// Last observed state of one dependency. Unhealthy until first checked.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    state: RwLock<Observation>,
}

impl ComponentHealth {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(Observation {
                healthy: false,
                message: None,
                checked_at: None,
            }),
        }
    }

    pub fn set_healthy(&self) {
        *self.state.write() = Observation {
            healthy: true,
            message: None,
            checked_at: Some(Utc::now()),
        };
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        *self.state.write() = Observation {
            healthy: false,
            message: Some(msg.into()),
            checked_at: Some(Utc::now()),
        };
    }

    pub fn is_healthy(&self) -> bool {
        self.state.read().healthy
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn report(&self) -> ComponentHealthReport {
        let state = self.state.read().clone();
        ComponentHealthReport {
            name: self.name.to_string(),
            healthy: state.healthy,
            message: state.message,
            checked_at: state.checked_at,
        }
    }
}

/// Aggregated health status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub draining: bool,
    pub components: Vec<ComponentHealthReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthReport {
    pub name: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Health of the dependencies every pipeline process shares.
pub struct HealthRegistry {
    pub broker: ComponentHealth,
    pub store: ComponentHealth,
    draining: AtomicBool,
}

impl HealthRegistry {
    pub const fn new() -> Self {
        Self {
            broker: ComponentHealth::new("broker"),
            store: ComponentHealth::new("store"),
            draining: AtomicBool::new(false),
        }
    }

    fn components(&self) -> [&ComponentHealth; 2] {
        [&self.broker, &self.store]
    }

    pub fn report(&self) -> HealthReport {
        let components: Vec<_> = self.components().iter().map(|c| c.report()).collect();

        let healthy = components.iter().filter(|c| c.healthy).count();
        let status = match healthy {
            n if n == components.len() => HealthStatus::Healthy,
            0 => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        HealthReport {
            status,
            draining: self.is_draining(),
            components,
        }
    }

    /// Stop reporting ready; called once a shutdown signal arrives.
    pub fn begin_shutdown(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    /// Uploads need both the store (job rows) and the broker (events).
    pub fn is_ready(&self) -> bool {
        !self.is_draining() && self.components().iter().all(|c| c.is_healthy())
    }

    /// The process answers requests; dependencies do not affect liveness.
    pub fn is_alive(&self) -> bool {
        true
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static HEALTH: HealthRegistry = HealthRegistry::new();

/// Get the global health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
