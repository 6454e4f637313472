//! Records held by the document stores.

use chrono::{DateTime, Utc};
use duochat_shared::api::UserSummary;
use duochat_shared::{DeviceKind, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An account. One per email; both of the user's devices share it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub web_public_key: Option<String>,
    pub mobile_public_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, password_hash: &str) -> Self {
        Self {
            id: UserId::new(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            web_public_key: None,
            mobile_public_key: None,
            created_at: Utc::now(),
        }
    }

    pub fn public_key(&self, device: DeviceKind) -> Option<&str> {
        match device {
            DeviceKind::Web => self.web_public_key.as_deref(),
            DeviceKind::Mobile => self.mobile_public_key.as_deref(),
        }
    }

    pub(crate) fn set_public_key(&mut self, device: DeviceKind, key: &str) {
        let slot = match device {
            DeviceKind::Web => &mut self.web_public_key,
            DeviceKind::Mobile => &mut self.mobile_public_key,
        };
        *slot = Some(key.to_string());
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            email: self.email.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat history
// ---------------------------------------------------------------------------

/// One element of a user's message history.
///
/// `payload` is whatever the sending device put on the wire; the store only
/// looks at its `id` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    /// Server-assigned, stable even when the payload carries no `id`.
    pub record_id: Uuid,
    pub owner: UserId,
    pub payload: Value,
    pub saved_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(owner: UserId, payload: Value) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            owner,
            payload,
            saved_at: Utc::now(),
        }
    }

    /// The client-chosen message id, if the payload has a string one.
    pub fn message_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }

    /// Whether a delete-by-id request targets this record.
    pub fn matches(&self, id: &str) -> bool {
        self.message_id() == Some(id) || self.record_id.to_string() == id
    }

    /// Raw payload field, whatever its JSON type.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}
