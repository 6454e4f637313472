//! Local message cache and its reconciliation with server history.
//!
//! Delivery across the relay is at-least-once and unordered between devices,
//! so every path into the cache deduplicates by id and the cache is kept
//! sorted by `created_at`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use duochat_shared::api::MessageView;
use duochat_shared::{decrypt_or_placeholder, encrypt, ChatMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, Result};

const UNKNOWN_SENDER: &str = "unknown";

/// Union of two message lists: unique ids (first occurrence wins), ascending
/// `created_at`.
pub fn merge_messages(a: &[ChatMessage], b: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut seen = HashSet::new();
    let mut merged: Vec<ChatMessage> = a
        .iter()
        .chain(b)
        .filter(|m| seen.insert(m.id.as_str()))
        .cloned()
        .collect();
    merged.sort_by_key(|m| m.created_at);
    merged
}

/// Build an outgoing payload. With a shared secret the ciphertext triple is
/// attached next to the plaintext.
pub fn compose_message(content: &str, sender_id: &str, secret: Option<&str>) -> ChatMessage {
    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        content: Some(content.to_string()),
        sender_id: sender_id.to_string(),
        created_at: Utc::now(),
        ciphertext: None,
        iv: None,
        auth_tag: None,
    };
    match secret {
        Some(secret) => message.with_encrypted(encrypt(content, secret)),
        None => message,
    }
}

/// A message as a device displays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMessage {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
    /// Confirmed by the server, through history or the relay.
    pub is_synced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupEntry {
    content: String,
    sender_id: String,
    created_at: DateTime<Utc>,
}

/// Counts from [`MessageCache::apply_history`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistorySync {
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageCache {
    entries: Vec<CachedMessage>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile with a fresh history fetch.
    ///
    /// Synced entries missing from `history` were deleted elsewhere and are
    /// dropped; unsynced local entries are kept. History entries not yet
    /// cached are added, decrypted when possible.
    pub fn apply_history(&mut self, history: &[MessageView], secret: Option<&str>) -> HistorySync {
        let history_ids: HashSet<&str> = history.iter().map(|m| m.id.as_str()).collect();

        let before = self.entries.len();
        self.entries
            .retain(|m| !m.is_synced || history_ids.contains(m.id.as_str()));
        let removed = before - self.entries.len();

        let mut added = 0;
        for view in history {
            if let Some(existing) = self.get_mut(&view.id) {
                existing.is_synced = true;
                continue;
            }
            let text = MessageView::text;
            let content = match (
                text(&view.ciphertext),
                text(&view.iv),
                text(&view.auth_tag),
                secret,
            ) {
                (Some(ciphertext), Some(iv), Some(tag), Some(secret)) => {
                    decrypt_or_placeholder(ciphertext, iv, tag, secret)
                }
                _ => text(&view.content).unwrap_or_default().to_string(),
            };
            self.insert(CachedMessage {
                id: view.id.clone(),
                content,
                sender_id: text(&view.sender_id)
                    .unwrap_or(UNKNOWN_SENDER)
                    .to_string(),
                created_at: parse_time(view.created_at.as_ref()),
                is_synced: true,
            });
            added += 1;
        }

        debug!(added, removed, total = self.entries.len(), "Applied server history");
        HistorySync { added, removed }
    }

    /// Take a message off the relay. Returns `false` for a duplicate, which
    /// still marks the cached copy as synced.
    pub fn receive(&mut self, message: &ChatMessage, secret: Option<&str>) -> bool {
        if let Some(existing) = self.get_mut(&message.id) {
            existing.is_synced = true;
            return false;
        }
        let content = match (message.encrypted(), secret) {
            (Some(payload), Some(secret)) => decrypt_or_placeholder(
                &payload.ciphertext,
                &payload.iv,
                &payload.auth_tag,
                secret,
            ),
            _ => message.content.clone().unwrap_or_default(),
        };
        self.insert(CachedMessage {
            id: message.id.clone(),
            content,
            sender_id: message.sender_id.clone(),
            created_at: message.created_at,
            is_synced: true,
        });
        true
    }

    /// Optimistically add a message this device just sent.
    pub fn insert_local(&mut self, message: &ChatMessage, content: &str) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.insert(CachedMessage {
            id: message.id.clone(),
            content: content.to_string(),
            sender_id: message.sender_id.clone(),
            created_at: message.created_at,
            is_synced: false,
        });
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|m| m.id != id);
        before != self.entries.len()
    }

    /// Every cached message, oldest first.
    pub fn ordered(&self) -> &[CachedMessage] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CachedMessage> {
        self.entries.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON array of `{content, senderId, createdAt}`, oldest first.
    pub fn export_backup(&self) -> Result<String> {
        let entries: Vec<BackupEntry> = self
            .entries
            .iter()
            .map(|m| BackupEntry {
                content: m.content.clone(),
                sender_id: m.sender_id.clone(),
                created_at: m.created_at,
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Restore from [`export_backup`](Self::export_backup) output. Entries
    /// get fresh ids and stay unsynced; existing messages are kept.
    pub fn import_backup(&mut self, json: &str) -> Result<usize> {
        let parsed: Value = serde_json::from_str(json)?;
        let Value::Array(items) = parsed else {
            return Err(ClientError::Backup("Backup data must be an array".into()));
        };

        let count = items.len();
        for item in items {
            let text = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);
            self.insert(CachedMessage {
                id: Uuid::new_v4().to_string(),
                content: text("content").unwrap_or_default(),
                sender_id: text("senderId").unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
                created_at: parse_time(item.get("createdAt")),
                is_synced: false,
            });
        }
        Ok(count)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut CachedMessage> {
        self.entries.iter_mut().find(|m| m.id == id)
    }

    // Keeps `entries` sorted; equal timestamps stay in arrival order.
    fn insert(&mut self, message: CachedMessage) {
        let at = self
            .entries
            .partition_point(|m| m.created_at <= message.created_at);
        self.entries.insert(at, message);
    }
}

// RFC 3339 text or epoch milliseconds; anything else reads as now.
fn parse_time(value: Option<&Value>) -> DateTime<Utc> {
    let parsed = match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(Value::Number(n)) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    parsed.unwrap_or_else(Utc::now)
}
