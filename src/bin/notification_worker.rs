//! Notification worker: consumes job-finished events.

use std::sync::Arc;

use anyhow::{Context, Result};
use broker::AmqpConsumer;
use pipeline_core::JobFinishedEvent;
use telemetry::init_tracing_from_env;
use tracing::{error, info};
use upload_pipeline::{load_config, shutdown_signal, Infrastructure};
use worker::{build_mailer, NotificationWorker};

const SERVICE: &str = "notification-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env(SERVICE);

    info!("Starting notification worker v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let infra = Infrastructure::connect(&config).await?;
    let _background = infra.start_background(config.relay.clone());

    let mailer = build_mailer(&config.mail).context("Failed to configure mailer")?;
    let handler = Arc::new(NotificationWorker::new(infra.store.clone(), mailer));

    let consumer = AmqpConsumer::<JobFinishedEvent>::new(&infra.connection, &config.broker)
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
