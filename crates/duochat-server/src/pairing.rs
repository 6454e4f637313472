//! QR pairing between a logged-in web session and a mobile device.
//!
//! A pairing token is a random UUID stored in the key-value store under
//! `qr:<token>` for a few minutes. Redemption removes it with an atomic
//! take, so of any number of concurrent redeemers exactly one wins and a
//! redeemed or expired token can never be used again.

use std::sync::Arc;
use std::time::Duration;

use duochat_shared::api::TokenPair;
use duochat_shared::constants::QR_KEY_PREFIX;
use duochat_shared::{DeviceKind, UserId};
use duochat_store::{KeyValueStore, StoreError, User, UserStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::tokens::{TokenError, TokenService};

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("Invalid or expired QR token")]
    InvalidOrExpired,

    #[error("User not found")]
    UserNotFound,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt pairing record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

/// What the key-value store holds for a pending pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingPairing {
    user_id: UserId,
    web_public_key: Option<String>,
}

/// Result of a successful redemption.
#[derive(Debug, Clone)]
pub struct PairedSession {
    pub user: User,
    pub tokens: TokenPair,
    /// The web device's public key, for the mobile side of key agreement.
    pub other_public_key: Option<String>,
}

pub struct QrBroker {
    kv: Arc<dyn KeyValueStore>,
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
    ttl: Duration,
}

fn storage_key(qr_token: &str) -> String {
    format!("{QR_KEY_PREFIX}{qr_token}")
}

fn non_empty(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.is_empty())
}

impl QrBroker {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        users: Arc<dyn UserStore>,
        tokens: Arc<TokenService>,
        ttl: Duration,
    ) -> Self {
        Self {
            kv,
            users,
            tokens,
            ttl,
        }
    }

    /// Start a pairing for an authenticated user.
    ///
    /// A supplied web public key is also written to the user record, so it
    /// outlives the pairing token.
    pub async fn create_pairing(
        &self,
        user_id: UserId,
        web_public_key: Option<&str>,
    ) -> Result<String, PairingError> {
        let web_public_key = non_empty(web_public_key);
        let qr_token = Uuid::new_v4().to_string();
        let pending = PendingPairing {
            user_id,
            web_public_key: web_public_key.map(str::to_string),
        };

        self.kv
            .set(
                &storage_key(&qr_token),
                serde_json::to_string(&pending)?,
                Some(self.ttl),
            )
            .await?;

        if let Some(key) = web_public_key {
            self.users
                .set_public_key(user_id, DeviceKind::Web, key)
                .await?;
        }

        info!(user = %user_id.short(), ttl_secs = self.ttl.as_secs(), "QR pairing created");
        Ok(qr_token)
    }

    /// Exchange a pairing token for a session, exactly once.
    pub async fn redeem_pairing(
        &self,
        qr_token: &str,
        mobile_public_key: Option<&str>,
    ) -> Result<PairedSession, PairingError> {
        let Some(raw) = self.kv.take(&storage_key(qr_token)).await? else {
            debug!("QR token unknown, expired or already redeemed");
            return Err(PairingError::InvalidOrExpired);
        };
        let pending: PendingPairing = serde_json::from_str(&raw)?;

        let user = self
            .users
            .find_user(pending.user_id)
            .await?
            .ok_or(PairingError::UserNotFound)?;

        if let Some(key) = non_empty(mobile_public_key) {
            self.users
                .set_public_key(user.id, DeviceKind::Mobile, key)
                .await?;
        }

        let tokens = self.tokens.issue(&user)?;
        let other_public_key = user
            .web_public_key
            .clone()
            .or(pending.web_public_key);

        info!(user = %user.id.short(), "QR pairing redeemed");
        Ok(PairedSession {
            user,
            tokens,
            other_public_key,
        })
    }

    /// Evict expired pairing records.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.kv.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use duochat_store::Stores;

    fn broker(stores: &Stores, ttl: Duration) -> QrBroker {
        let config = ServerConfig::with_secrets("a", "r");
        QrBroker::new(
            stores.kv.clone(),
            stores.users.clone(),
            Arc::new(TokenService::new(&config)),
            ttl,
        )
    }

    #[tokio::test]
    async fn test_redeem_exactly_once() {
        let stores = Stores::in_memory();
        let user = stores.users.insert_user("alice@example.com", "h").await.unwrap();
        let broker = broker(&stores, Duration::from_secs(300));

        let token = broker.create_pairing(user.id, Some("webkey")).await.unwrap();

        let session = broker.redeem_pairing(&token, Some("mobilekey")).await.unwrap();
        assert_eq!(session.user.id, user.id);
        assert_eq!(session.other_public_key.as_deref(), Some("webkey"));

        let stored = stores.users.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.web_public_key.as_deref(), Some("webkey"));
        assert_eq!(stored.mobile_public_key.as_deref(), Some("mobilekey"));

        assert!(matches!(
            broker.redeem_pairing(&token, None).await,
            Err(PairingError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_redemption_single_winner() {
        let stores = Stores::in_memory();
        let user = stores.users.insert_user("a@b.c", "h").await.unwrap();
        let broker = Arc::new(broker(&stores, Duration::from_secs(300)));
        let token = broker.create_pairing(user.id, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                broker.redeem_pairing(&token, None).await.is_ok()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_expired_token_unredeemable() {
        let stores = Stores::in_memory();
        let user = stores.users.insert_user("a@b.c", "h").await.unwrap();
        let broker = broker(&stores, Duration::from_millis(20));
        let token = broker.create_pairing(user.id, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            broker.redeem_pairing(&token, None).await,
            Err(PairingError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_other_key_falls_back_to_pairing_record() {
        let stores = Stores::in_memory();
        let user = stores.users.insert_user("a@b.c", "h").await.unwrap();
        let broker = broker(&stores, Duration::from_secs(300));

        // a pending pairing whose web key never reached the user record
        let pending = PendingPairing {
            user_id: user.id,
            web_public_key: Some("pending-web-key".into()),
        };
        stores
            .kv
            .set(
                &storage_key("tok-1"),
                serde_json::to_string(&pending).unwrap(),
                Some(Duration::from_secs(300)),
            )
            .await
            .unwrap();

        let session = broker.redeem_pairing("tok-1", None).await.unwrap();
        assert!(session.user.web_public_key.is_none());
        assert_eq!(session.other_public_key.as_deref(), Some("pending-web-key"));
    }

    #[tokio::test]
    async fn test_no_web_key_anywhere_yields_none() {
        let stores = Stores::in_memory();
        let user = stores.users.insert_user("a@b.c", "h").await.unwrap();
        let broker = broker(&stores, Duration::from_secs(300));

        let token = broker.create_pairing(user.id, None).await.unwrap();
        let session = broker.redeem_pairing(&token, None).await.unwrap();
        assert!(session.other_public_key.is_none());
        assert!(session.user.mobile_public_key.is_none());
    }

    #[tokio::test]
    async fn test_user_record_key_wins_over_pairing_record() {
        let stores = Stores::in_memory();
        let user = stores.users.insert_user("a@b.c", "h").await.unwrap();
        stores
            .users
            .set_public_key(user.id, DeviceKind::Web, "record-key")
            .await
            .unwrap();
        let broker = broker(&stores, Duration::from_secs(300));

        let pending = PendingPairing {
            user_id: user.id,
            web_public_key: Some("pending-web-key".into()),
        };
        stores
            .kv
            .set(
                &storage_key("tok-2"),
                serde_json::to_string(&pending).unwrap(),
                None,
            )
            .await
            .unwrap();

        let session = broker.redeem_pairing("tok-2", None).await.unwrap();
        assert_eq!(session.other_public_key.as_deref(), Some("record-key"));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let stores = Stores::in_memory();
        let broker = broker(&stores, Duration::from_secs(300));
        let token = broker.create_pairing(UserId::new(), None).await.unwrap();
        assert!(matches!(
            broker.redeem_pairing(&token, None).await,
            Err(PairingError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_purge_drops_expired_pairings() {
        let stores = Stores::in_memory();
        let broker = broker(&stores, Duration::from_millis(10));
        broker.create_pairing(UserId::new(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(broker.purge_expired().await.unwrap(), 1);
    }
}
