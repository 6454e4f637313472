//! Storage interfaces the server is written against.
//!
//! The key-value store stands in for a cache with per-key expiry; the user and
//! chat stores stand in for a document database with one profile document and
//! one message-history document per user.

use std::time::Duration;

use async_trait::async_trait;
use duochat_shared::{DeviceKind, UserId};
use serde_json::Value;

use crate::error::Result;
use crate::models::{StoredMessage, User};

/// String key-value store with optional per-key TTL.
///
/// Expired entries must be invisible to `get`/`take` even before
/// [`purge_expired`](KeyValueStore::purge_expired) removes them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomic get-and-delete. Of any number of concurrent callers for the
    /// same key, at most one observes `Some`.
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `StoreError::Conflict` when the email is taken.
    async fn insert_user(&self, email: &str, password_hash: &str) -> Result<User>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Returns `false` when the user does not exist.
    async fn set_public_key(&self, id: UserId, device: DeviceKind, key: &str) -> Result<bool>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Append to the owner's history, creating it if absent.
    async fn push_message(&self, owner: UserId, payload: Value) -> Result<StoredMessage>;

    /// Remove every record matching `id`. `false` when nothing matched.
    async fn pull_message(&self, owner: UserId, id: &str) -> Result<bool>;

    /// The owner's history in insertion order.
    async fn messages(&self, owner: UserId) -> Result<Vec<StoredMessage>>;
}
