//! depotd - content distribution server
//!
//! Serves in-game downloadable content over the binary TCP protocol,
//! backed by a local filesystem index and blob storage.

use depot_index::LocalIndex;
use depot_server::{Config, Server};
use depot_storage::LocalStorage;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if DEPOT_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("DEPOT_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("DEPOT_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting depot content server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Index folder: {}", config.index.folder.display());
    tracing::info!("  Storage folder: {}", config.storage.folder.display());
    tracing::info!(
        "  Limits: {} connections, {} MiB in flight",
        config.network.max_connections,
        config.transfer.max_inflight_bytes / (1024 * 1024)
    );

    // Load the index before accepting connections
    let index = Arc::new(LocalIndex::new(&config.index.folder));
    let stats = index.reload().await?;
    tracing::info!(
        "  Index loaded: {} entries listed, {} archived",
        stats.listed,
        stats.archived
    );

    let storage = Arc::new(LocalStorage::new(&config.storage.folder));

    let reload_interval = config.index.reload_interval();
    let server = Arc::new(Server::new(config, index.clone(), storage)?);

    // Periodically pick up index changes, if configured
    if let Some(interval) = reload_interval {
        let index = index.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match index.reload().await {
                    Ok(stats) => tracing::info!(
                        "Index reloaded: {} entries listed, {} archived",
                        stats.listed,
                        stats.archived
                    ),
                    Err(e) => tracing::error!("Index reload failed: {}", e),
                }
            }
        });
    }

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
