//! [`UserStore`] and [`ChatStore`] over a SQLite [`Database`].
//!
//! The connection sits behind a mutex; each call runs on the blocking pool so
//! a slow disk never stalls the async workers.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duochat_shared::{DeviceKind, UserId};
use serde_json::Value;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{StoredMessage, User};
use crate::traits::{ChatStore, UserStore};

#[derive(Clone)]
pub struct SqliteDocuments {
    db: Arc<Mutex<Database>>,
}

impl SqliteDocuments {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Database::open_at(path).map(Self::new)
    }

    pub(crate) async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&*guard)
        })
        .await?
    }
}

#[async_trait]
impl UserStore for SqliteDocuments {
    async fn insert_user(&self, email: &str, password_hash: &str) -> Result<User> {
        let user = User::new(email, password_hash);
        let row = user.clone();
        self.with_db(move |db| db.insert_user(&row)).await?;
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_db(move |db| db.get_user(id)).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_string();
        self.with_db(move |db| db.get_user_by_email(&email)).await
    }

    async fn set_public_key(&self, id: UserId, device: DeviceKind, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_db(move |db| db.update_public_key(id, device, &key))
            .await
    }
}

#[async_trait]
impl ChatStore for SqliteDocuments {
    async fn push_message(&self, owner: UserId, payload: Value) -> Result<StoredMessage> {
        let record = StoredMessage::new(owner, payload);
        let row = record.clone();
        self.with_db(move |db| db.append_message(&row)).await?;
        Ok(record)
    }

    async fn pull_message(&self, owner: UserId, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_db(move |db| db.delete_messages_by_id(owner, &id))
            .await
    }

    async fn messages(&self, owner: UserId) -> Result<Vec<StoredMessage>> {
        self.with_db(move |db| db.get_messages_for_owner(owner)).await
    }
}
