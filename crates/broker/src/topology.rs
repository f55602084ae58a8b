//! Exchange and queue declarations.
//!
//! Declarations are idempotent: every process declares the routes it
//! touches on startup. Work queues are quorum queues so the broker tracks
//! redeliveries (`x-delivery-count`) and dead-letters a message once it
//! exceeds `x-delivery-limit`.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{Channel, ExchangeKind};
use pipeline_core::limits::DEAD_LETTER_EXCHANGE;
use pipeline_core::{Error, Result, Route};
use tracing::debug;

/// Arguments for a route's work queue.
pub fn queue_arguments(route: &Route, max_deliveries: u32) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString(LongString::from("quorum")),
    );
    args.insert(
        ShortString::from("x-delivery-limit"),
        AMQPValue::LongInt(max_deliveries.min(i32::MAX as u32) as i32),
    );
    args.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(LongString::from(DEAD_LETTER_EXCHANGE)),
    );
    args.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(LongString::from(route.queue)),
    );
    args
}

fn durable_exchange() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    }
}

fn broker_err(what: &str, e: lapin::Error) -> Error {
    Error::broker(format!("{what}: {e}"))
}

/// Declare the dead-letter exchange and the parking queue for `route`.
async fn declare_dead_letter(channel: &Channel, route: &Route) -> Result<()> {
    let dlq = route.dead_letter_queue();

    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Direct,
            durable_exchange(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| broker_err("declare dead-letter exchange", e))?;

    channel
        .queue_declare(&dlq, durable_queue(), FieldTable::default())
        .await
        .map_err(|e| broker_err("declare dead-letter queue", e))?;

    channel
        .queue_bind(
            &dlq,
            DEAD_LETTER_EXCHANGE,
            route.queue,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| broker_err("bind dead-letter queue", e))?;

    Ok(())
}

/// Declare the exchange, work queue, binding and dead-letter path of a route.
pub async fn declare_route(channel: &Channel, route: &Route, max_deliveries: u32) -> Result<()> {
    declare_dead_letter(channel, route).await?;

    channel
        .exchange_declare(
            route.exchange,
            ExchangeKind::Direct,
            durable_exchange(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| broker_err("declare exchange", e))?;

    channel
        .queue_declare(
            route.queue,
            durable_queue(),
            queue_arguments(route, max_deliveries),
        )
        .await
        .map_err(|e| broker_err("declare queue", e))?;

    channel
        .queue_bind(
            route.queue,
            route.exchange,
            route.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| broker_err("bind queue", e))?;

    debug!(
        exchange = route.exchange,
        queue = route.queue,
        routing_key = route.routing_key,
        "Route declared"
    );

    Ok(())
}
