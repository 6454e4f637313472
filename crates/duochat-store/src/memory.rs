//! In-memory backends.
//!
//! `MemoryKv` is the pairing-token cache used in every deployment;
//! `MemoryDocuments` is the user/chat store when no database path is
//! configured, and the backend most server tests run against.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use duochat_shared::{DeviceKind, UserId};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::{StoredMessage, User};
use crate::traits::{ChatStore, KeyValueStore, UserStore};

// ---------------------------------------------------------------------------
// Key-value
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        // Lookup and removal happen under one write guard.
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        Ok(entries
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired key-value entries");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Documents {
    users: HashMap<UserId, User>,
    chats: HashMap<UserId, Vec<StoredMessage>>,
}

#[derive(Clone, Default)]
pub struct MemoryDocuments {
    inner: Arc<RwLock<Documents>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryDocuments {
    async fn insert_user(&self, email: &str, password_hash: &str) -> Result<User> {
        let mut docs = self.inner.write().await;
        if docs.users.values().any(|u| u.email == email) {
            return Err(StoreError::Conflict(format!("email {email} already registered")));
        }
        let user = User::new(email, password_hash);
        docs.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let docs = self.inner.read().await;
        Ok(docs.users.values().find(|u| u.email == email).cloned())
    }

    async fn set_public_key(&self, id: UserId, device: DeviceKind, key: &str) -> Result<bool> {
        let mut docs = self.inner.write().await;
        match docs.users.get_mut(&id) {
            Some(user) => {
                user.set_public_key(device, key);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ChatStore for MemoryDocuments {
    async fn push_message(&self, owner: UserId, payload: Value) -> Result<StoredMessage> {
        let record = StoredMessage::new(owner, payload);
        self.inner
            .write()
            .await
            .chats
            .entry(owner)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn pull_message(&self, owner: UserId, id: &str) -> Result<bool> {
        let mut docs = self.inner.write().await;
        let Some(history) = docs.chats.get_mut(&owner) else {
            return Ok(false);
        };
        let before = history.len();
        history.retain(|record| !record.matches(id));
        Ok(history.len() < before)
    }

    async fn messages(&self, owner: UserId) -> Result<Vec<StoredMessage>> {
        let docs = self.inner.read().await;
        Ok(docs.chats.get(&owner).cloned().unwrap_or_default())
    }
}
