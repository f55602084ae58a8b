//! Relational store for the upload pipeline.
//!
//! The store is the only state shared by the three processes. Status writes
//! are checked against the transition table inside the UPDATE itself, and
//! every event-producing status change enqueues its event in the outbox in
//! the same transaction.

pub mod client;
pub mod config;
pub mod health;
pub mod jobs;
pub mod outbox;
pub mod records;
pub mod schema;

pub use client::*;
pub use config::*;
pub use jobs::*;
pub use outbox::*;
pub use records::*;
