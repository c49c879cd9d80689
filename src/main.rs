use anyhow::{Context, Result};
use peer_relay::api::{create_router, RelayInformation};
use peer_relay::config::{load_config, RelayConfig};
use peer_relay::relay::RelayEngine;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peer_relay=info".into()),
        )
        .init();

    info!("Peer relay starting...");

    // Config file is optional; environment overrides either way
    let mut config = match std::env::var("RELAY_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => RelayConfig::default(),
    };
    config.apply_env();

    info!(
        bind = %config.server.bind,
        upstream_relays = config.upstream.relays.len(),
        verify_signatures = !config.nostr.disable_signature,
        max_events = ?config.nostr.max_events,
        "Configuration loaded"
    );

    let engine = Arc::new(RelayEngine::new(&config));

    // Startup sync runs in the background; clients are served meanwhile
    let sync_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        sync_engine.sync_from_upstream().await;
    });

    let router = create_router(
        Arc::clone(&engine),
        RelayInformation::from(&config.info),
        config.server.static_dir.clone(),
    );
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "Relay listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Relay server error")?;

    info!(events = engine.event_count(), "Peer relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
