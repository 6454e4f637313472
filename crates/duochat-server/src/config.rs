//! Server configuration loaded from environment variables.
//!
//! Everything except the two token secrets has a default, so a development
//! server needs only `ACCESS_TOKEN_SECRET` and `REFRESH_TOKEN_SECRET`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use duochat_shared::constants::{
    ACCESS_TOKEN_TTL_SECS, DEFAULT_HTTP_PORT, QR_TOKEN_TTL_SECS, REFRESH_TOKEN_TTL_SECS,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingSecret(&'static str),
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// HMAC secret for access tokens.
    /// Env: `ACCESS_TOKEN_SECRET` (required)
    pub access_token_secret: String,

    /// HMAC secret for refresh tokens.
    /// Env: `REFRESH_TOKEN_SECRET` (required)
    pub refresh_token_secret: String,

    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite file for users and message history. In-memory when unset.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Env: `ACCESS_TOKEN_TTL_SECS`, default 15 minutes.
    pub access_token_ttl: Duration,

    /// Env: `REFRESH_TOKEN_TTL_SECS`, default 7 days.
    pub refresh_token_ttl: Duration,

    /// Env: `QR_TOKEN_TTL_SECS`, default 5 minutes.
    pub qr_token_ttl: Duration,

    /// How often expired key-value entries are evicted.
    /// Env: `KV_SWEEP_INTERVAL_SECS`, default 60.
    pub kv_sweep_interval: Duration,
}

// Secrets stay out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("qr_token_ttl", &self.qr_token_ttl)
            .field("kv_sweep_interval", &self.kv_sweep_interval)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Config with the given secrets and every other setting at its default.
    pub fn with_secrets(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access_token_secret: access.into(),
            refresh_token_secret: refresh.into(),
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            access_token_ttl: Duration::from_secs(ACCESS_TOKEN_TTL_SECS as u64),
            refresh_token_ttl: Duration::from_secs(REFRESH_TOKEN_TTL_SECS as u64),
            qr_token_ttl: Duration::from_secs(QR_TOKEN_TTL_SECS),
            kv_sweep_interval: Duration::from_secs(60),
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingSecret(name))
        };
        let mut config = Self::with_secrets(
            secret("ACCESS_TOKEN_SECRET")?,
            secret("REFRESH_TOKEN_SECRET")?,
        );

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        let seconds = |name: &str, slot: &mut Duration| {
            if let Some(val) = lookup(name) {
                match val.parse::<u64>() {
                    Ok(n) if n > 0 => *slot = Duration::from_secs(n),
                    _ => tracing::warn!(value = %val, "Invalid {name}, using default"),
                }
            }
        };
        seconds("ACCESS_TOKEN_TTL_SECS", &mut config.access_token_ttl);
        seconds("REFRESH_TOKEN_TTL_SECS", &mut config.refresh_token_ttl);
        seconds("QR_TOKEN_TTL_SECS", &mut config.qr_token_ttl);
        seconds("KV_SWEEP_INTERVAL_SECS", &mut config.kv_sweep_interval);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        Ok(config)
    }
}
