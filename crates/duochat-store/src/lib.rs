//! # duochat-store
//!
//! Storage for the duochat server.
//!
//! The server only talks to the [`KeyValueStore`], [`UserStore`] and
//! [`ChatStore`] traits. Pairing tokens always live in the in-memory
//! key-value store; users and message history live either in memory or in a
//! SQLite file through the synchronous [`Database`] handle, which wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers.

pub mod chats;
pub mod database;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod sqlite;
pub mod stores;
pub mod traits;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::{MemoryDocuments, MemoryKv};
pub use models::*;
pub use sqlite::SqliteDocuments;
pub use stores::Stores;
pub use traits::{ChatStore, KeyValueStore, UserStore};
