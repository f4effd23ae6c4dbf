//! Error types shared across the relay.
//!
//! Every failure here is scoped to one connection or one inbound event.
//! Nothing in this module is fatal to the server process.

use std::fmt;

/// Why a handshake did not yield a verified identity.
/// The connection still proceeds, anonymously.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("no session token presented")]
    MissingToken,
    #[error("session token failed verification")]
    InvalidToken,
}

/// Failure reported by the message store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while staging an attachment. Logged, never surfaced to the sender.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment payload has no data separator")]
    MissingSeparator,
    #[error("attachment payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("attachment write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(u64),
    #[error("connection {0} already has an identity")]
    IdentityAlreadyBound(u64),
}

/// Why an inbound event was dropped without delivery.
#[derive(Debug, thiserror::Error)]
pub enum RouteDrop {
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),
    #[error("sender connection has no identity")]
    Unauthenticated,
    #[error("event has no recipient")]
    MissingRecipient,
    #[error("event has neither text nor attachment")]
    EmptyMessage,
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    StreamEnded,
    TransportError,
    LivenessTimeout,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::ClientClosed => "client closed",
            CloseReason::StreamEnded => "stream ended",
            CloseReason::TransportError => "transport error",
            CloseReason::LivenessTimeout => "liveness timeout",
            CloseReason::Shutdown => "server shutdown",
        };
        f.write_str(s)
    }
}
