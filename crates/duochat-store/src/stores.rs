//! The set of store handles a server process runs with.
//!
//! Built once at startup, cloned into request state, shut down on exit.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::memory::{MemoryDocuments, MemoryKv};
use crate::sqlite::SqliteDocuments;
use crate::traits::{ChatStore, KeyValueStore, UserStore};

#[derive(Clone)]
pub struct Stores {
    pub kv: Arc<dyn KeyValueStore>,
    pub users: Arc<dyn UserStore>,
    pub chats: Arc<dyn ChatStore>,
    sqlite: Option<SqliteDocuments>,
}

impl Stores {
    /// Everything in process memory. Lost on restart.
    pub fn in_memory() -> Self {
        let docs = MemoryDocuments::new();
        Self {
            kv: Arc::new(MemoryKv::new()),
            users: Arc::new(docs.clone()),
            chats: Arc::new(docs),
            sqlite: None,
        }
    }

    /// Users and chat history in SQLite at `path`; pairing tokens stay in
    /// memory since they live for minutes.
    pub fn open_sqlite(path: &Path) -> Result<Self> {
        let docs = SqliteDocuments::open(path)?;
        Ok(Self {
            kv: Arc::new(MemoryKv::new()),
            users: Arc::new(docs.clone()),
            chats: Arc::new(docs.clone()),
            sqlite: Some(docs),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.sqlite.is_some()
    }

    /// Release backing resources. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(docs) = &self.sqlite {
            docs.with_db(|db| db.checkpoint()).await?;
            info!("database checkpointed");
        }
        Ok(())
    }
}
