//! Presence broadcast.
//!
//! Every membership change pushes the full roster to every registered
//! connection, anonymous observers included. There is no coalescing: one
//! trigger, one broadcast.

use crate::ws::protocol::ServerFrame;
use crate::ws::registry::{ConnectionRegistry, PresenceEntry};

/// Compute the roster and push it to every connection.
/// Returns the roster that was sent.
pub fn broadcast_presence(registry: &ConnectionRegistry) -> Vec<PresenceEntry> {
    let (online, connections) = registry.snapshot();
    let frame = ServerFrame::Presence {
        online: online.clone(),
    };

    if let Some(msg) = frame.to_message() {
        for conn in &connections {
            // a failed push means the writer is gone; its own teardown path cleans up
            let _ = conn.send(msg.clone());
        }
    }

    tracing::debug!(
        online = online.len(),
        recipients = connections.len(),
        "Presence broadcast"
    );
    online
}
