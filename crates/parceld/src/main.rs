//! parceld — chunked upload server.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use parcel_api::ApiState;
use parcel_core::config::ParcelConfig;
use parcel_services::{janitor, open_backend, ChunkStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ParcelConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParcelConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        let mut config = ParcelConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    });
    tracing::info!(
        config = %ParcelConfig::file_path().display(),
        backend = ?config.storage.backend,
        "parceld starting"
    );

    // Storage
    let backend = open_backend(&config.storage).context("failed to open storage backend")?;
    let store = ChunkStore::new(backend)
        .with_tombstone_ttl(Duration::from_secs(config.sessions.tombstone_ttl_secs));

    let max_chunk_bytes =
        usize::try_from(config.server.max_chunk_bytes).context("max_chunk_bytes does not fit in memory")?;
    let state = ApiState::new(store.clone(), max_chunk_bytes);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Shutdown broadcast
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let janitor_task = tokio::spawn(janitor::run(
        store,
        Duration::from_secs(config.sessions.janitor_interval_secs),
        Duration::from_secs(config.sessions.ttl_secs),
        shutdown_tx.subscribe(),
    ));

    let api_task = tokio::spawn(parcel_api::serve(state, listener, shutdown_tx.subscribe()));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let result = match api_task.await {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("API task panicked: {e}")),
    };
    if let Err(e) = &result {
        tracing::error!(error = %e, "API server failed");
    }
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(());
    let _ = janitor_task.await;

    result
}
