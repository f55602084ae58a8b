//! Workers for the upload pipeline.
//!
//! - Processing (JobCreatedEvent → parse, dedup, insert → JobFinishedEvent)
//! - Notifications (JobFinishedEvent → email → Notified)
//! - Outbox relay and metrics log (every process)

pub mod dedup;
pub mod mailer;
pub mod notifications;
pub mod parser;
pub mod processing;
pub mod relay;
pub mod scheduler;

pub use dedup::{skip_summary, DedupIndex, RowVerdict, SkipReason};
pub use mailer::*;
pub use notifications::NotificationWorker;
pub use parser::{parse_upload, SheetRow};
pub use processing::{ProcessReport, ProcessingWorker};
pub use relay::*;
pub use scheduler::*;
