//! Durable event channel over AMQP (RabbitMQ).
//!
//! Each event type owns one durable direct exchange and one quorum queue.
//! Consumers fetch one message at a time and settle it from the handler's
//! typed outcome.

pub mod config;
pub mod consumer;
pub mod health;
pub mod publisher;
pub mod topology;

pub use config::*;
pub use consumer::*;
pub use health::*;
pub use publisher::*;
pub use topology::*;
