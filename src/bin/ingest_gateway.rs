//! Ingestion gateway: accepts uploads and registers jobs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use api::{router, AppState, HistoryService, IngestionCoordinator};
use file_storage::build_file_store;
use history_cache::build_cache;
use telemetry::init_tracing_from_env;
use tracing::info;
use upload_pipeline::{load_config, shutdown_signal, Infrastructure};

const SERVICE: &str = "ingest-gateway";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env(SERVICE);

    info!("Starting ingestion gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let infra = Infrastructure::connect(&config).await?;
    let _background = infra.start_background(config.relay.clone());

    let files = build_file_store(&config.storage).context("Failed to create file store")?;
    let cache = build_cache(&config.cache)
        .await
        .context("Failed to connect to the cache")?;

    let coordinator = Arc::new(IngestionCoordinator::new(
        infra.store.clone(),
        infra.store.clone(),
        files,
        cache.clone(),
        infra.publisher.clone(),
    ));
    let history = Arc::new(
        HistoryService::new(infra.store.clone(), infra.store.clone(), cache)
            .with_ttl(config.cache.history_ttl()),
    );

    let app = router(AppState::new(coordinator, history, config.gateway.clone()));

    let addr: SocketAddr = config
        .gateway
        .bind_addr()
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
