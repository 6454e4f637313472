use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use duochat_shared::api::ErrorBody;
use duochat_store::StoreError;
use thiserror::Error;

use crate::pairing::PairingError;
use crate::tokens::TokenError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn unauthorized(message: &str) -> Self {
        Self::Unauthorized(message.to_string())
    }

    pub fn bad_request(message: &str) -> Self {
        Self::BadRequest(message.to_string())
    }

    pub fn not_found(message: &str) -> Self {
        Self::NotFound(message.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Store(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TokenError> for ServerError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid => ServerError::unauthorized("Invalid token"),
            TokenError::Encode(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<PairingError> for ServerError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::InvalidOrExpired => {
                ServerError::unauthorized("Invalid or expired QR token")
            }
            PairingError::UserNotFound => ServerError::not_found("User not found"),
            PairingError::Store(e) => ServerError::Store(e),
            PairingError::Corrupt(e) => ServerError::Internal(e.to_string()),
            PairingError::Token(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Store(e) => {
                tracing::error!(error = %e, "store failure");
                "Internal Server Error".to_string()
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        (status, axum::Json(ErrorBody { message })).into_response()
    }
}
