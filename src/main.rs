//! Gatehouse server binary: loads configuration, binds the listener, and
//! runs the accept loop until a shutdown signal arrives.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use gatehouse::config::env::{apply_env_overrides, get_config_path};
use gatehouse::config::types::ServerConfig;
use gatehouse::config::{load_config, validate_server_config};
use gatehouse::server::{InMemoryAccounts, InMemoryMaps, ServerEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("gatehouse v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("loading configuration from {}...", config_path);

    let config: ServerConfig = load_config(&config_path).map_err(|e| {
        error!("failed to load configuration: {}", e);
        error!("ensure {} exists and is valid json", config_path);
        e
    })?;
    let config = apply_env_overrides(config);
    validate_server_config(&config)?;

    info!("configuration loaded");
    info!("  server name: {}", config.identity.server_name);
    info!("  listen: {}:{}", config.listen.host, config.listen.port);
    info!("  registration: {}", config.auth.registration_enabled);
    if config.tls.is_none() {
        warn!("no tls certificate configured, using a self-signed development certificate");
    }

    let accounts = Arc::new(InMemoryAccounts::new());
    let maps = Arc::new(InMemoryMaps::new());
    let engine = ServerEngine::bind(config, accounts, maps).await?;

    tokio::select! {
        result = engine.run() => {
            if let Err(e) = result {
                error!("listener failed: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    info!("exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c"),
        _ = terminate => info!("received sigterm"),
    }
}
