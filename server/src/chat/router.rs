//! Inbound message routing.
//!
//! The client protocol is fire-and-forget: nothing in here answers the
//! sender. The outcome is returned to the caller only so it can be logged,
//! and so an acknowledgement protocol can later be layered on top of
//! [`InboundHandler`] without touching the registry or heartbeat.

use std::sync::Arc;

use async_trait::async_trait;

use crate::attachments::{decode_data_url, AttachmentRef, AttachmentStore};
use crate::db::models::{NewMessage, StoredMessage};
use crate::db::store::MessageStore;
use crate::error::{AttachmentError, RouteDrop};
use crate::ws::connection::Connection;
use crate::ws::protocol::{ClientEvent, Delivery, InlineAttachment, ServerFrame};
use crate::ws::registry::ConnectionRegistry;

/// A persisted message and how many live connections it was pushed to.
#[derive(Debug, Clone)]
pub struct Routed {
    pub message: StoredMessage,
    pub deliveries: usize,
}

pub type RouteOutcome = Result<Routed, RouteDrop>;

/// Handles application frames read from a connection, in arrival order.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, conn: &Connection, raw: &str) -> RouteOutcome;
}

pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    attachments: Arc<dyn AttachmentStore>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn MessageStore>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        Self {
            registry,
            store,
            attachments,
        }
    }

    /// Validate, persist, then push to every live connection of the recipient.
    pub async fn route(&self, conn: &Connection, raw: &str) -> RouteOutcome {
        let event = ClientEvent::parse(raw)?;

        let sender = conn
            .identity()
            .map(|identity| identity.user_id.clone())
            .ok_or(RouteDrop::Unauthenticated)?;

        // checked before staging so a recipient-less event leaves no orphan file
        let recipient = event.recipient().ok_or(RouteDrop::MissingRecipient)?;

        let attachment_ref = match &event.attachment {
            Some(attachment) => self.stage_attachment(conn, attachment).await,
            None => None,
        };

        let text = event.text();
        if text.is_none() && attachment_ref.is_none() {
            return Err(RouteDrop::EmptyMessage);
        }

        let message = self
            .store
            .create_message(NewMessage {
                sender,
                recipient: recipient.to_string(),
                text: text.map(str::to_string),
                attachment_ref,
            })
            .await?;

        let deliveries = self.deliver(&message);
        Ok(Routed {
            message,
            deliveries,
        })
    }

    /// Staging failures degrade to a message without attachment.
    async fn stage_attachment(
        &self,
        conn: &Connection,
        attachment: &InlineAttachment,
    ) -> Option<AttachmentRef> {
        let staged = match decode_data_url(&attachment.data) {
            Ok(bytes) => self.attachments.stage(&attachment.name, bytes).await,
            Err(e) => Err(e),
        };
        staged
            .map_err(|e: AttachmentError| {
                tracing::warn!(
                    conn_id = conn.id(),
                    attachment = %attachment.name,
                    error = %e,
                    "Attachment staging failed"
                );
            })
            .ok()
    }

    fn deliver(&self, message: &StoredMessage) -> usize {
        // copied out of the registry; no lock is held while sending
        let targets = self.registry.connections_for(&message.recipient);
        if targets.is_empty() {
            return 0;
        }

        let frame = ServerFrame::Message(Delivery {
            text: message.text.clone(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            attachment_ref: message.attachment_ref.clone(),
            id: message.id.clone(),
        });
        let Some(msg) = frame.to_message() else {
            return 0;
        };

        targets
            .iter()
            .filter(|target| target.send(msg.clone()))
            .count()
    }
}

#[async_trait]
impl InboundHandler for MessageRouter {
    async fn handle(&self, conn: &Connection, raw: &str) -> RouteOutcome {
        let outcome = self.route(conn, raw).await;
        match &outcome {
            Ok(routed) => tracing::debug!(
                conn_id = conn.id(),
                message_id = %routed.message.id,
                deliveries = routed.deliveries,
                "Message relayed"
            ),
            Err(RouteDrop::Persistence(e)) => tracing::error!(
                conn_id = conn.id(),
                error = %e,
                "Message dropped: persistence failed"
            ),
            Err(reason) => tracing::debug!(
                conn_id = conn.id(),
                reason = %reason,
                "Inbound event dropped"
            ),
        }
        outcome
    }
}
