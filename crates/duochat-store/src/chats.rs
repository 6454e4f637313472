use chrono::{DateTime, Utc};
use duochat_shared::UserId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::StoredMessage;

impl Database {
    pub fn append_message(&self, record: &StoredMessage) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        self.conn().execute(
            "INSERT INTO chat_messages (record_id, owner_id, message_id, payload, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.record_id.to_string(),
                record.owner.to_string(),
                record.message_id(),
                payload,
                record.saved_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_messages_for_owner(&self, owner: UserId) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT record_id, owner_id, payload, saved_at
             FROM chat_messages
             WHERE owner_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![owner.to_string()], row_to_record)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete every record of `owner` whose payload id or record id is `id`.
    pub fn delete_messages_by_id(&self, owner: UserId, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_messages
             WHERE owner_id = ?1 AND (message_id = ?2 OR record_id = ?2)",
            params![owner.to_string(), id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let record_str: String = row.get(0)?;
    let owner_str: String = row.get(1)?;
    let payload_str: String = row.get(2)?;
    let ts_str: String = row.get(3)?;

    let record_id = Uuid::parse_str(&record_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let owner = Uuid::parse_str(&owner_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let payload = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let saved_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(StoredMessage {
        record_id,
        owner: UserId(owner),
        payload,
        saved_at,
    })
}
