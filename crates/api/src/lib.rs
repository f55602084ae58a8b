//! Ingestion gateway.
//!
//! The coordinator and history service hold the logic; the HTTP layer is a
//! thin adapter over them.

pub mod config;
pub mod coordinator;
pub mod history;
pub mod response;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use coordinator::{IngestionCoordinator, UploadRequest};
pub use history::HistoryService;
pub use routes::router;
pub use state::AppState;
