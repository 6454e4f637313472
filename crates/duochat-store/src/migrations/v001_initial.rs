//! v001 -- Initial schema creation.
//!
//! Creates `users` (one profile document per account) and `chat_messages`
//! (one row per element of a user's message history).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    email             TEXT NOT NULL UNIQUE,
    password_hash     TEXT NOT NULL,              -- Argon2 PHC string
    web_public_key    TEXT,                       -- hex
    mobile_public_key TEXT,                       -- hex
    created_at        TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Chat history
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT, -- insertion order
    record_id  TEXT NOT NULL UNIQUE,              -- UUID v4, server-assigned
    owner_id   TEXT NOT NULL,                     -- users(id), not enforced
    message_id TEXT,                              -- payload "id", if any
    payload    TEXT NOT NULL,                     -- JSON as received
    saved_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_owner
    ON chat_messages(owner_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
