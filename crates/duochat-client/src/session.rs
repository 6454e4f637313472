//! Per-device session: key material, signed-in user, tokens and the shared
//! secret used for message encryption.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use duochat_shared::api::{TokenPair, UserSummary};
use duochat_shared::constants::ACCESS_TOKEN_TTL_SECS;
use duochat_shared::{derive_shared_secret, generate_key_pair, DeviceKind, KeyPair};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::error::{ClientError, Result};

/// How often [`DeviceSession::spawn_refresh`] rotates tokens by default.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(ACCESS_TOKEN_TTL_SECS as u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    device: DeviceKind,
    keys: KeyPair,
    #[serde(default)]
    user: Option<UserSummary>,
    #[serde(default)]
    tokens: Option<TokenPair>,
    #[serde(default)]
    shared_secret: Option<String>,
}

impl DeviceSession {
    /// A signed-out session with fresh key material.
    pub fn new(device: DeviceKind) -> Self {
        Self {
            device,
            keys: generate_key_pair(),
            user: None,
            tokens: None,
            shared_secret: None,
        }
    }

    /// Load the session stored at `path`, or start a new one if there is none.
    pub async fn load_or_create(path: &Path, device: DeviceKind) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let session: Self = serde_json::from_slice(&bytes)?;
                info!(path = %path.display(), device = session.device.as_str(), "Loaded device session");
                Ok(session)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(device)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn public_key(&self) -> &str {
        &self.keys.public_key
    }

    pub fn user(&self) -> Option<&UserSummary> {
        self.user.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some() && self.tokens.is_some()
    }

    pub fn access_token(&self) -> Result<&str> {
        self.tokens
            .as_ref()
            .map(|t| t.access_token.as_str())
            .ok_or(ClientError::NotLoggedIn)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.refresh_token.as_str())
    }

    pub fn shared_secret(&self) -> Option<&str> {
        self.shared_secret.as_deref()
    }

    /// Record a successful sign-in and derive the shared secret from the
    /// local private key and the counterpart's public key, when known.
    pub fn login_with_session(
        &mut self,
        user: UserSummary,
        tokens: TokenPair,
        other_public_key: Option<&str>,
    ) {
        info!(user = %user.id.short(), device = self.device.as_str(), "Session started");
        self.user = Some(user);
        self.tokens = Some(tokens);
        self.set_counterpart_key(other_public_key);
    }

    fn set_counterpart_key(&mut self, other_public_key: Option<&str>) {
        if let Some(secret) = derive_shared_secret(Some(&self.keys.private_key), other_public_key)
        {
            self.shared_secret = Some(secret);
        }
    }

    pub fn update_tokens(&mut self, tokens: TokenPair) {
        self.tokens = Some(tokens);
    }

    /// Forget the user, tokens and secret. Key material survives so the
    /// device keeps its identity across sign-ins.
    pub fn logout(&mut self) {
        self.user = None;
        self.tokens = None;
        self.shared_secret = None;
    }

    /// Web sign-in with email and password, publishing this device's key.
    ///
    /// The login response only echoes the key just published, so the shared
    /// secret waits for [`Self::sync_keys`] once a mobile device has paired.
    pub async fn login(&mut self, api: &ApiClient, email: &str, password: &str) -> Result<()> {
        let resp = api.login(email, password, Some(self.public_key())).await?;
        self.login_with_session(resp.user, resp.tokens, None);
        Ok(())
    }

    /// Mobile sign-in by redeeming a scanned QR pairing token.
    pub async fn pair_with_qr(&mut self, api: &ApiClient, qr_token: &str) -> Result<()> {
        let resp = api.qr_login(qr_token, Some(self.public_key())).await?;
        self.login_with_session(resp.user, resp.tokens, resp.other_public_key.as_deref());
        Ok(())
    }

    /// Re-derive the shared secret from the other device's key as currently
    /// stored on the server.
    pub async fn sync_keys(&mut self, api: &ApiClient) -> Result<()> {
        let keys = api.keys(self.access_token()?).await?;
        let other = match self.device {
            DeviceKind::Web => keys.mobile_public_key,
            DeviceKind::Mobile => keys.web_public_key,
        };
        self.set_counterpart_key(other.as_deref());
        Ok(())
    }

    /// Rotate tokens every `every` until a refresh fails, at which point the
    /// session is logged out and the task ends.
    pub fn spawn_refresh(
        session: Arc<Mutex<DeviceSession>>,
        api: ApiClient,
        every: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // the first tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(refresh_token) = session.lock().await.refresh_token().map(str::to_string)
                else {
                    continue;
                };
                match api.refresh(&refresh_token).await {
                    Ok(tokens) => session.lock().await.update_tokens(tokens),
                    Err(e) => {
                        warn!(error = %e, "Token refresh failed; signing out");
                        session.lock().await.logout();
                        break;
                    }
                }
            }
        })
    }
}
