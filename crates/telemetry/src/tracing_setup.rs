//! Structured logging for the pipeline processes.
//!
//! Every process installs one subscriber at startup and logs its service name
//! once, so output from the gateway and the workers can be told apart.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "info,lapin=warn,sqlx=warn";

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Process name, e.g. "processing-worker"
    pub service: &'static str,
    /// Log level filter (e.g., "info", "worker=debug,broker=debug")
    pub filter: String,
    /// Whether to output JSON format
    pub json: bool,
    /// Whether to log span open/close (per-message handler spans)
    pub span_events: bool,
}

impl TracingConfig {
    pub fn new(service: &'static str) -> Self {
        Self {
            service,
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            span_events: false,
        }
    }

    /// Read `RUST_LOG`, `LOG_JSON` and `LOG_SPAN_EVENTS`.
    pub fn from_env(service: &'static str) -> Self {
        Self::from_lookup(service, |key| std::env::var(key).ok())
    }

    fn from_lookup(service: &'static str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(service);
        if let Some(filter) = lookup("RUST_LOG").filter(|f| !f.trim().is_empty()) {
            config.filter = filter;
        }
        config.json = lookup("LOG_JSON").is_some_and(|v| is_truthy(&v));
        config.span_events = lookup("LOG_SPAN_EVENTS").is_some_and(|v| is_truthy(&v));
        config
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Install the global subscriber.
pub fn init_tracing(config: TracingConfig) {
    let env_filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_target(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    tracing::info!(
        service = config.service,
        filter = %config.filter,
        json = config.json,
        "Tracing initialized"
    );
}

/// Initialize tracing from environment variables for `service`.
pub fn init_tracing_from_env(service: &'static str) {
    init_tracing(TracingConfig::from_env(service));
}
