//! Acknowledging consumer.
//!
//! Delivery discipline:
//! - prefetch (default 1) bounds unacknowledged messages per consumer, so a
//!   queue is processed strictly one message at a time per process
//! - the handler runs to completion before its message is settled
//! - settlement follows the handler's [`HandlerOutcome`]

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, BasicRejectOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection};
use pipeline_core::{Error, PipelineEvent, Result};
use telemetry::metrics;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::topology::declare_route;

/// Result of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Side effects are durable; remove the message.
    Success,
    /// A later attempt may succeed; requeue while deliveries remain.
    RetryableFailure,
    /// Retrying cannot help; dead-letter the message.
    FatalFailure,
}

/// What the consumer does with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
    DeadLetter,
}

/// Map a handler outcome to a settlement.
///
/// `attempt` is 1-based. A retryable failure on the last allowed attempt is
/// dead-lettered instead of requeued.
pub fn settle(outcome: HandlerOutcome, attempt: u32, max_deliveries: u32) -> Settlement {
    match outcome {
        HandlerOutcome::Success => Settlement::Ack,
        HandlerOutcome::FatalFailure => Settlement::DeadLetter,
        HandlerOutcome::RetryableFailure if attempt >= max_deliveries => Settlement::DeadLetter,
        HandlerOutcome::RetryableFailure => Settlement::Requeue,
    }
}

fn as_count(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

/// 1-based delivery attempt of a message.
///
/// Quorum queues report previous deliveries in `x-delivery-count`; without
/// the header a redelivered message counts as at least its second attempt.
pub fn delivery_attempt(headers: Option<&FieldTable>, redelivered: bool) -> u32 {
    let previous = headers.and_then(|headers| {
        headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == "x-delivery-count")
            .and_then(|(_, value)| as_count(value))
    });

    match previous {
        Some(count) => count.saturating_add(1),
        None if redelivered => 2,
        None => 1,
    }
}

/// Handles one decoded event type.
#[async_trait]
pub trait EventHandler<E: PipelineEvent>: Send + Sync {
    async fn handle(&self, event: E) -> HandlerOutcome;
}

/// Decode a payload and run the handler.
///
/// Malformed payloads are fatal: they are quarantined, never partially decoded.
pub async fn dispatch<E, H>(handler: &H, payload: &[u8]) -> HandlerOutcome
where
    E: PipelineEvent,
    H: EventHandler<E> + ?Sized,
{
    match E::decode(payload) {
        Ok(event) => handler.handle(event).await,
        Err(e) => {
            error!(event = E::NAME, error = %e, "Discarding malformed event");
            HandlerOutcome::FatalFailure
        }
    }
}

/// Consumer bound to the queue of one event type.
pub struct AmqpConsumer<E> {
    channel: Channel,
    config: BrokerConfig,
    _event: PhantomData<fn() -> E>,
}

impl<E: PipelineEvent> AmqpConsumer<E> {
    /// Opens a channel, declares the event's route and applies prefetch.
    pub async fn new(connection: &Connection, config: &BrokerConfig) -> Result<Self> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Error::broker(format!("open consumer channel: {e}")))?;

        declare_route(&channel, &E::ROUTE, config.max_deliveries).await?;

        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| Error::broker(format!("set prefetch: {e}")))?;

        info!(
            queue = E::ROUTE.queue,
            prefetch = config.prefetch,
            max_deliveries = config.max_deliveries,
            "Consumer ready"
        );

        Ok(Self {
            channel,
            config: config.clone(),
            _event: PhantomData,
        })
    }

    /// Consume until the broker closes the stream.
    ///
    /// Returns an error when the stream ends; there is no mid-run reconnect.
    pub async fn run<H>(&self, handler: Arc<H>) -> Result<()>
    where
        H: EventHandler<E> + ?Sized,
    {
        let tag = format!("{}-{}", self.config.consumer_tag, E::NAME);
        let mut deliveries = self
            .channel
            .basic_consume(
                E::ROUTE.queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::broker(format!("consume {}: {e}", E::ROUTE.queue)))?;

        while let Some(delivery) = deliveries.next().await {
            let delivery =
                delivery.map_err(|e| Error::broker(format!("delivery from {}: {e}", E::ROUTE.queue)))?;
            self.process(handler.as_ref(), delivery).await?;
        }

        warn!(queue = E::ROUTE.queue, "Consumer stream closed");
        Err(Error::broker(format!("consumer for {} closed", E::ROUTE.queue)))
    }

    async fn process<H>(&self, handler: &H, delivery: Delivery) -> Result<()>
    where
        H: EventHandler<E> + ?Sized,
    {
        let attempt = delivery_attempt(
            delivery.properties.headers().as_ref(),
            delivery.redelivered,
        );
        let start = Instant::now();

        metrics().messages_in_flight.inc();
        let outcome = dispatch::<E, H>(handler, &delivery.data).await;
        metrics().messages_in_flight.dec();

        let settlement = settle(outcome, attempt, self.config.max_deliveries);

        debug!(
            queue = E::ROUTE.queue,
            delivery_tag = delivery.delivery_tag,
            delivery_count = attempt,
            outcome = ?outcome,
            settlement = ?settlement,
            latency_ms = %start.elapsed().as_millis(),
            "Message handled"
        );

        let settled = match settlement {
            Settlement::Ack => {
                metrics().messages_acked.inc();
                delivery.acker.ack(BasicAckOptions::default()).await
            }
            Settlement::Requeue => {
                metrics().messages_requeued.inc();
                warn!(
                    queue = E::ROUTE.queue,
                    delivery_count = attempt,
                    "Handler failed, requeueing message"
                );
                delivery.acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await
            }
            Settlement::DeadLetter => {
                metrics().messages_dead_lettered.inc();
                error!(
                    queue = E::ROUTE.queue,
                    dead_letter_queue = %E::ROUTE.dead_letter_queue(),
                    delivery_count = attempt,
                    outcome = ?outcome,
                    "Dead-lettering message"
                );
                delivery.acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
        };

        settled.map_err(|e| Error::broker(format!("settle message on {}: {e}", E::ROUTE.queue)))
    }
}
