//! Row types for the relay's tables.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A message accepted by the router, before the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    pub attachment_ref: Option<String>,
}

/// A persisted message, as returned to history readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    pub attachment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: String,
    pub username: String,
}
