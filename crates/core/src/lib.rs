//! Core types for the upload pipeline: jobs and their state machine,
//! processed records, broker events, outbox rows and the error taxonomy.

pub mod error;
pub mod events;
pub mod job;
pub mod limits;
pub mod outbox;
pub mod record;

pub use error::{Error, Result};
pub use events::*;
pub use job::*;
pub use outbox::*;
pub use record::*;
