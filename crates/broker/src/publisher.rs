//! Event publishing.

use std::time::Instant;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::types::ShortString;
use lapin::{BasicProperties, Channel, Connection};
use pipeline_core::{Error, OutboxMessage, PipelineEvent, Result, Route};
use telemetry::metrics;
use tracing::{debug, error};

use crate::config::BrokerConfig;
use crate::topology::declare_route;

/// Persistent delivery mode (survives broker restarts).
const PERSISTENT: u8 = 2;

/// Publishes serialized events to an exchange.
///
/// An `Ok` return means the broker accepted the message; callers must not
/// treat the triggering action as complete otherwise.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_raw(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;
}

/// Serialize and publish a typed event on its route.
pub async fn publish_event<E: PipelineEvent>(
    publisher: &dyn EventPublisher,
    event: &E,
) -> Result<()> {
    let payload = event.encode()?;
    publisher
        .publish_raw(E::ROUTE.exchange, E::ROUTE.routing_key, &payload)
        .await
}

/// Publish a stored outbox row as-is.
pub async fn publish_outbox(publisher: &dyn EventPublisher, message: &OutboxMessage) -> Result<()> {
    publisher
        .publish_raw(&message.exchange, &message.routing_key, &message.payload)
        .await
}

/// AMQP publisher with publisher confirms.
pub struct AmqpPublisher {
    channel: Channel,
    confirms: bool,
}

impl AmqpPublisher {
    /// Opens a channel and declares the routes this process publishes to.
    pub async fn new(connection: &Connection, config: &BrokerConfig, routes: &[Route]) -> Result<Self> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Error::broker(format!("open publisher channel: {e}")))?;

        for route in routes {
            declare_route(&channel, route, config.max_deliveries).await?;
        }

        if config.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| Error::broker(format!("enable publisher confirms: {e}")))?;
        }

        Ok(Self {
            channel,
            confirms: config.publisher_confirms,
        })
    }

    fn properties() -> BasicProperties {
        BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(ShortString::from("application/json"))
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    async fn publish_raw(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let start = Instant::now();

        let result = async {
            let confirm = self
                .channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    Self::properties(),
                )
                .await
                .map_err(|e| Error::broker(format!("publish to {exchange}: {e}")))?
                .await
                .map_err(|e| Error::broker(format!("confirm from {exchange}: {e}")))?;

            if self.confirms && confirm.is_nack() {
                return Err(Error::broker(format!("broker rejected message for {exchange}")));
            }
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => {
                metrics().events_published.inc();
                metrics()
                    .publish_latency_ms
                    .observe(start.elapsed().as_millis() as u64);
                debug!(
                    exchange = %exchange,
                    routing_key = %routing_key,
                    bytes = payload.len(),
                    "Event published"
                );
            }
            Err(e) => {
                metrics().publish_errors.inc();
                error!(exchange = %exchange, routing_key = %routing_key, error = %e, "Publish failed");
            }
        }

        result
    }
}
