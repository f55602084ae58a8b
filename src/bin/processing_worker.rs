//! Processing worker: consumes job-created events.

use std::sync::Arc;

use anyhow::{Context, Result};
use broker::AmqpConsumer;
use file_storage::build_file_store;
use history_cache::build_cache;
use pipeline_core::JobCreatedEvent;
use telemetry::init_tracing_from_env;
use tracing::{error, info};
use upload_pipeline::{load_config, shutdown_signal, Infrastructure};
use worker::ProcessingWorker;

const SERVICE: &str = "processing-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env(SERVICE);

    info!("Starting processing worker v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let infra = Infrastructure::connect(&config).await?;
    let _background = infra.start_background(config.relay.clone());

    let files = build_file_store(&config.storage).context("Failed to create file store")?;
    let cache = build_cache(&config.cache)
        .await
        .context("Failed to connect to the cache")?;

    let handler = Arc::new(ProcessingWorker::new(
        infra.store.clone(),
        infra.store.clone(),
        infra.store.clone(),
        files,
        cache,
        infra.publisher.clone(),
    ));

    let consumer = AmqpConsumer::<JobCreatedEvent>::new(&infra.connection, &config.broker)
        .await
        .context("Failed to create consumer")?;

    tokio::select! {
        result = consumer.run(handler) => {
            if let Err(e) = result {
                error!("Consumer stopped: {}", e);
                return Err(e).context("Consumer stopped");
            }
        }
        _ = shutdown_signal() => {}
    }

    info!("Shutdown complete");
    Ok(())
}
