//! JSON frames exchanged over the relay socket.
//!
//! Server → client: a presence snapshot `{"online": [...]}` or a delivered
//! message `{"text","sender","recipient","attachmentRef","id"}`.
//! Client → server: `{"recipient","text","attachment":{"name","data"}}`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::ws::registry::PresenceEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub text: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub attachment_ref: Option<String>,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Presence { online: Vec<PresenceEntry> },
    Message(Delivery),
}

impl ServerFrame {
    /// Encode once so the same frame can be cloned to many connections.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server frame");
                None
            }
        }
    }
}

/// Attachment as sent inline by legacy clients: `data` is a data URL
/// (`data:<mime>;base64,<payload>`).
#[derive(Debug, Clone, Deserialize)]
pub struct InlineAttachment {
    pub name: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientEvent {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "file")]
    pub attachment: Option<InlineAttachment>,
}

impl ClientEvent {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Recipient, treating an empty string as absent.
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref().filter(|r| !r.is_empty())
    }

    /// Text, treating an empty string as absent.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}
