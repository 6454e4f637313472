//! # duochat-client
//!
//! Device-side library used by the web and mobile front ends: talks to the
//! HTTP API, holds the relay socket, keeps the device session on disk and
//! reconciles the local message cache with server history.

pub mod api;
pub mod cache;
pub mod error;
pub mod relay;
pub mod session;

pub use api::ApiClient;
pub use cache::{compose_message, merge_messages, CachedMessage, MessageCache};
pub use error::{ClientError, Result};
pub use relay::{RelayConnection, RelayUpdate};
pub use session::DeviceSession;
