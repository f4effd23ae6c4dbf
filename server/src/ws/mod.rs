pub mod actor;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod presence;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

/// Sender half of a connection's outbound channel.
/// The connection's writer task owns the socket sink and drains this channel.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Process-local connection handle. Never persisted, never reused.
pub type ConnectionId = u64;
