//! Asynchronous spreadsheet upload pipeline.
//!
//! Three processes share this configuration and wiring:
//! - `ingest-gateway`: accepts uploads and registers jobs
//! - `processing-worker`: parses, deduplicates and stores rows
//! - `notification-worker`: emails the outcome and finalizes jobs

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use api::GatewayConfig;
use broker::{connect_with_retry, AmqpPublisher, BrokerConfig};
use file_storage::FileStorageConfig;
use history_cache::CacheConfig;
use job_store::{PgStore, StoreConfig};
use lapin::Connection;
use pipeline_core::{JOB_CREATED_ROUTE, JOB_FINISHED_ROUTE};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};
use worker::{MailConfig, OutboxRelay, RelayConfig, SchedulerConfig, WorkerScheduler};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub storage: FileStorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Load configuration from defaults, `config/default.toml` and the environment.
pub fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("PIPELINE")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Single-underscore overrides for the most common nested keys.
///
/// The config crate's nested parsing doesn't work reliably with underscored
/// field names.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(uri) = var("PIPELINE_BROKER_URI") {
        config.broker.uri = uri;
    }
    if let Some(url) = var("PIPELINE_STORE_URL") {
        config.store.url = url;
    }
    if let Some(url) = var("PIPELINE_CACHE_URL") {
        config.cache.url = url;
    }
    if let Some(url) = var("PIPELINE_STORAGE_MASTER_URL") {
        config.storage.master_url = url;
    }
    if let Some(url) = var("PIPELINE_STORAGE_VOLUME_URL") {
        config.storage.volume_url = url;
    }
    if let Some(host) = var("PIPELINE_SMTP_HOST") {
        config.mail.host = host;
    }
    if let Some(port) = var("PIPELINE_SMTP_PORT").and_then(|p| p.parse().ok()) {
        config.mail.port = port;
    }
    if let Some(username) = var("PIPELINE_SMTP_USERNAME") {
        config.mail.username = Some(username);
    }
    if let Some(password) = var("PIPELINE_SMTP_PASSWORD") {
        config.mail.password = Some(password);
    }
    if let Some(sender) = var("PIPELINE_SMTP_SENDER") {
        config.mail.sender = sender;
    }
}

/// Connections every process holds for its whole lifetime.
pub struct Infrastructure {
    pub connection: Connection,
    pub store: Arc<PgStore>,
    pub publisher: Arc<AmqpPublisher>,
}

impl Infrastructure {
    /// Connect the store and the broker.
    ///
    /// The broker connection is retried a bounded number of times; exhaustion
    /// aborts startup.
    pub async fn connect(config: &Config) -> Result<Self> {
        let store = Arc::new(
            PgStore::connect(&config.store)
                .await
                .context("Failed to connect to the store")?,
        );
        job_store::health::check_connection(&store).await;

        let connection = connect_with_retry(&config.broker)
            .await
            .context("Failed to connect to the broker")?;

        // Any process may relay either event type.
        let publisher = Arc::new(
            AmqpPublisher::new(
                &connection,
                &config.broker,
                &[JOB_CREATED_ROUTE, JOB_FINISHED_ROUTE],
            )
            .await
            .context("Failed to create publisher")?,
        );

        Ok(Self {
            connection,
            store,
            publisher,
        })
    }

    /// Start the outbox relay, the metrics log and the health probe.
    pub fn start_background(&self, relay: RelayConfig) -> Vec<JoinHandle<()>> {
        let relay = Arc::new(OutboxRelay::new(
            self.store.clone(),
            self.publisher.clone(),
            relay,
        ));
        let scheduler = WorkerScheduler::new(SchedulerConfig::default()).with_relay(relay);
        let mut handles = scheduler.start();

        let store = self.store.clone();
        let connection_status = self.connection.status().clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                job_store::health::check_connection(&store).await;
                broker::check_connection(&connection_status);
            }
        }));

        handles
    }
}

/// Graceful shutdown signal handler.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }

    telemetry::health().begin_shutdown();
}
