//! Fixed names and limits shared by the three processes.

// === Cache ===

/// Single cache key holding the serialized job history.
pub const HISTORY_CACHE_KEY: &str = "job_history_summary";

/// Lifetime of the cached job history (2 minutes).
pub const HISTORY_CACHE_TTL_SECS: u64 = 120;

// === Parsing ===

/// Product name used when the name cell is blank.
pub const DEFAULT_PRODUCT_NAME: &str = "SIN NOMBRE";

/// Rows per INSERT statement during the bulk record write.
///
/// Each row binds 6 parameters; Postgres allows 65535 per statement.
pub const INSERT_CHUNK_SIZE: usize = 1000;

// === Broker ===

/// Dead-letter exchange shared by all work queues.
pub const DEAD_LETTER_EXCHANGE: &str = "pipeline.dlx";

/// Deliveries of one message before it is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Startup connection attempts before the process gives up.
pub const DEFAULT_CONNECT_RETRIES: u32 = 10;

/// Delay between startup connection attempts.
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 5_000;

// === Queries ===

/// Default and maximum row count for the processed data query.
pub const DEFAULT_RECORD_QUERY_LIMIT: u32 = 500;
pub const MAX_RECORD_QUERY_LIMIT: u32 = 5_000;

/// Upload body limit on the gateway (20MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
