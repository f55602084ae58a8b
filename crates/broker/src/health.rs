//! Broker connection setup and health.

use std::future::Future;
use std::time::Duration;

use lapin::{Connection, ConnectionProperties, ConnectionStatus};
use pipeline_core::{Error, Result};
use telemetry::health;
use tracing::{error, info, warn};

use crate::config::BrokerConfig;

/// Run `op` up to `attempts` times with a fixed delay between failures.
pub async fn retry_fixed<T, F, Fut>(attempts: u32, delay: Duration, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    target_name = what,
                    attempt,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(target_name = what, attempts, error = %e, "Giving up connecting");
                return Err(e);
            }
        }
    }
}

/// Connect to the broker, retrying a bounded number of times.
///
/// Only used at process start; exhaustion is fatal to the caller.
pub async fn connect_with_retry(config: &BrokerConfig) -> Result<Connection> {
    let delay = Duration::from_millis(config.connect_retry_delay_ms);
    let result = retry_fixed(config.connect_retries, delay, "broker", || async move {
        Connection::connect(&config.uri, ConnectionProperties::default())
            .await
            .map_err(|e| Error::broker(format!("connect: {e}")))
    })
    .await;

    match &result {
        Ok(_) => {
            health().broker.set_healthy();
            info!("Connected to broker");
        }
        Err(e) => health().broker.set_unhealthy(e.to_string()),
    }
    result
}

/// Check broker connection health and update the registry.
pub fn check_connection(status: &ConnectionStatus) -> bool {
    let connected = status.connected();
    if connected {
        health().broker.set_healthy();
    } else {
        health().broker.set_unhealthy("connection lost");
    }
    connected
}
