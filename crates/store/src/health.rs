//! Store health checks.

use telemetry::health;
use tracing::{debug, error};

use crate::client::PgStore;

/// Check store connection health and update the registry.
pub async fn check_connection(store: &PgStore) -> bool {
    match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(store.pool())
        .await
    {
        Ok(_) => {
            debug!("Store connection healthy");
            health().store.set_healthy();
            true
        }
        Err(e) => {
            error!("Store health check failed: {}", e);
            health().store.set_unhealthy(e.to_string());
            false
        }
    }
}
