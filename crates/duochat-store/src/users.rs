use chrono::{DateTime, Utc};
use duochat_shared::{DeviceKind, UserId};
use rusqlite::{params, ErrorCode, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

const USER_COLUMNS: &str =
    "id, email, password_hash, web_public_key, mobile_public_key, created_at";

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, email, password_hash, web_public_key, mobile_public_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.password_hash,
                    user.web_public_key,
                    user.mobile_public_key,
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("email {} already registered", user.email))
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn update_public_key(&self, id: UserId, device: DeviceKind, key: &str) -> Result<bool> {
        let sql = match device {
            DeviceKind::Web => "UPDATE users SET web_public_key = ?1 WHERE id = ?2",
            DeviceKind::Mobile => "UPDATE users SET mobile_public_key = ?1 WHERE id = ?2",
        };
        let affected = self.conn().execute(sql, params![key, id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id: UserId(id),
        email: row.get(1)?,
        password_hash: row.get(2)?,
        web_public_key: row.get(3)?,
        mobile_public_key: row.get(4)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("alice@example.com", "$argon2id$stub");
        db.insert_user(&user).unwrap();

        let by_id = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "alice@example.com");
        assert_eq!(by_id.password_hash, "$argon2id$stub");

        let by_email = db.get_user_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(db.get_user(UserId::new()).unwrap().is_none());
        assert!(db.get_user_by_email("bob@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&User::new("alice@example.com", "h")).unwrap();
        let err = db
            .insert_user(&User::new("alice@example.com", "h"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn public_keys_are_per_device() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("alice@example.com", "h");
        db.insert_user(&user).unwrap();

        assert!(db.update_public_key(user.id, DeviceKind::Web, "aa").unwrap());
        assert!(db.update_public_key(user.id, DeviceKind::Mobile, "bb").unwrap());
        assert!(!db.update_public_key(UserId::new(), DeviceKind::Web, "cc").unwrap());

        let stored = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(stored.web_public_key.as_deref(), Some("aa"));
        assert_eq!(stored.mobile_public_key.as_deref(), Some("bb"));
    }
}
