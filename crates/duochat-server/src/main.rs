//! # duochat-server
//!
//! Backend for a two-device chat: one user, one web client and one mobile
//! client sharing an encrypted conversation.
//!
//! This binary provides:
//! - **Token service** issuing short-lived access and long-lived refresh JWTs
//! - **QR handshake broker** that pairs a mobile device to a web session with
//!   single-use, five-minute pairing tokens
//! - **Message relay** over WebSocket, fanning every frame out to all
//!   connections of the sending user
//! - **REST API** (axum) for auth, key exchange and message history

mod api;
mod auth;
mod config;
mod error;
mod pairing;
mod password;
mod relay;
mod rooms;
mod tokens;

use duochat_store::Stores;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,duochat_server=debug,duochat_store=info")
            }),
        )
        .init();

    info!("Starting duochat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env()?;
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let stores = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "Using SQLite document store");
            Stores::open_sqlite(path)?
        }
        None => {
            warn!("DATABASE_PATH not set; users and messages are kept in memory only");
            Stores::in_memory()
        }
    };

    let app_state = AppState::new(&config, stores.clone());

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Expired pairing tokens are unreadable already; this reclaims the memory.
    let pairing = app_state.pairing.clone();
    let sweep_interval = config.kv_sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match pairing.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired pairing tokens"),
                Err(e) => warn!(error = %e, "Pairing token sweep failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    if let Err(e) = stores.shutdown().await {
        warn!(error = %e, "Store shutdown did not complete cleanly");
    }

    Ok(())
}
