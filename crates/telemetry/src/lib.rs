//! Process telemetry for the upload pipeline: structured logging setup,
//! in-memory counters and component health.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
