//! Durable message store.
//!
//! The relay only writes through [`MessageStore::create_message`]. History
//! readers use [`MessageStore::find_messages_between`] and must see every
//! message the relay persisted.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::models::{NewMessage, StoredMessage, UserSummary};
use crate::db::DbPool;
use crate::error::StoreError;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and creation time.
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Messages exchanged between two users, oldest first.
    async fn find_messages_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Record a user the relay has seen, refreshing their username.
    async fn remember_user(&self, identity: &Identity) -> Result<(), StoreError>;

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError>;
}

pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    // fixed-width so lexical order matches time order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let created_at: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(StoredMessage {
        id: row.get(0)?,
        sender: row.get(1)?,
        recipient: row.get(2)?,
        text: row.get(3)?,
        attachment_ref: row.get(4)?,
        created_at,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        self.with_conn(move |conn| {
            let stored = StoredMessage {
                id: Uuid::now_v7().to_string(),
                sender: message.sender,
                recipient: message.recipient,
                text: message.text,
                attachment_ref: message.attachment_ref,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO messages (id, sender, recipient, text, attachment_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    stored.id,
                    stored.sender,
                    stored.recipient,
                    stored.text,
                    stored.attachment_ref,
                    timestamp(&stored.created_at),
                ],
            )?;
            Ok(stored)
        })
        .await
    }

    async fn find_messages_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let a = user_a.to_string();
        let b = user_b.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, recipient, text, attachment_ref, created_at
                 FROM messages
                 WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let messages = stmt
                .query_map(rusqlite::params![a, b], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn remember_user(&self, identity: &Identity) -> Result<(), StoreError> {
        let identity = identity.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, username, last_seen_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username,
                                               last_seen_at = excluded.last_seen_at",
                rusqlite::params![identity.user_id, identity.username, timestamp(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, username FROM users ORDER BY username, id")?;
            let users = stmt
                .query_map([], |row| {
                    Ok(UserSummary {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }
}
