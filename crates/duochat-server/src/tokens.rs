//! Access and refresh tokens.
//!
//! Both kinds are HS256 JWTs carrying the same claims; they differ only in
//! lifetime and signing secret, so a refresh token never verifies as an
//! access token or the other way round.

use std::time::Duration;

use chrono::Utc;
use duochat_shared::api::TokenPair;
use duochat_shared::UserId;
use duochat_store::User;
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

struct Keys {
    encode: EncodingKey,
    decode: DecodingKey,
    ttl: i64,
}

impl Keys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encode: EncodingKey::from_secret(secret.as_bytes()),
            decode: DecodingKey::from_secret(secret.as_bytes()),
            ttl: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    fn sign(&self, sub: UserId, email: &str, now: i64) -> Result<String, TokenError> {
        let claims = Claims {
            sub,
            email: email.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encode)
            .map_err(TokenError::Encode)
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;

        match jsonwebtoken::decode::<Claims>(token.trim(), &self.decode, &validation) {
            Ok(data) => Ok(data.claims),
            Err(error) => match error.kind() {
                ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                _ => Err(TokenError::Invalid),
            },
        }
    }
}

pub struct TokenService {
    access: Keys,
    refresh: Keys,
}

impl TokenService {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            access: Keys::new(&config.access_token_secret, config.access_token_ttl),
            refresh: Keys::new(&config.refresh_token_secret, config.refresh_token_ttl),
        }
    }

    pub fn issue(&self, user: &User) -> Result<TokenPair, TokenError> {
        self.issue_at(user.id, &user.email, Utc::now().timestamp())
    }

    /// Issue a pair as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, sub: UserId, email: &str, now: i64) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.access.sign(sub, email, now)?,
            refresh_token: self.refresh.sign(sub, email, now)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.access.verify(token)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.refresh.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(&ServerConfig::with_secrets("access-secret", "refresh-secret"))
    }

    #[test]
    fn test_issue_and_verify() {
        let tokens = service();
        let user = User::new("alice@example.com", "h");
        let pair = tokens.issue(&user).unwrap();

        let access = tokens.verify_access(&pair.access_token).unwrap();
        assert_eq!(access.sub, user.id);
        assert_eq!(access.email, "alice@example.com");
        assert_eq!(access.exp - access.iat, 15 * 60);

        let refresh = tokens.verify_refresh(&pair.refresh_token).unwrap();
        assert_eq!(refresh.sub, user.id);
        assert_eq!(refresh.exp - refresh.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_kinds_do_not_cross_verify() {
        let tokens = service();
        let pair = tokens
            .issue_at(UserId::new(), "a@b.c", Utc::now().timestamp())
            .unwrap();
        assert!(matches!(
            tokens.verify_refresh(&pair.access_token),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            tokens.verify_access(&pair.refresh_token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_expired_access_token_rejected() {
        let tokens = service();
        let sixteen_minutes_ago = Utc::now().timestamp() - 16 * 60;
        let pair = tokens
            .issue_at(UserId::new(), "a@b.c", sixteen_minutes_ago)
            .unwrap();

        assert!(matches!(
            tokens.verify_access(&pair.access_token),
            Err(TokenError::Expired)
        ));
        // the refresh token from the same moment is still good
        assert!(tokens.verify_refresh(&pair.refresh_token).is_ok());
    }

    #[test]
    fn test_other_secret_and_garbage_rejected() {
        let pair = service()
            .issue_at(UserId::new(), "a@b.c", Utc::now().timestamp())
            .unwrap();
        let other = TokenService::new(&ServerConfig::with_secrets("x", "y"));
        assert!(matches!(
            other.verify_access(&pair.access_token),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            service().verify_access("not.a.jwt"),
            Err(TokenError::Invalid)
        ));
    }
}
