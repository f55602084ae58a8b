//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::coordinator::IngestionCoordinator;
use crate::history::HistoryService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IngestionCoordinator>,
    pub history: Arc<HistoryService>,
    pub config: GatewayConfig,
}

impl AppState {
    pub fn new(
        coordinator: Arc<IngestionCoordinator>,
        history: Arc<HistoryService>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            coordinator,
            history,
            config,
        }
    }
}
