use duochat_shared::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A non-2xx answer; `message` is the server's own wording.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay connection closed")]
    Disconnected,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Invalid backup: {0}")]
    Backup(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
