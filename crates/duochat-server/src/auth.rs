use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::api::AppState;
use crate::error::ServerError;
use crate::tokens::Claims;

/// A request carrying a valid access token in `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token =
            bearer_token(&parts.headers).ok_or_else(|| ServerError::unauthorized("Unauthorized"))?;
        let claims = state.tokens.verify_access(token)?;
        Ok(Self(claims))
    }
}
