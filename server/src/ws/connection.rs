use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::Message;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::ws::heartbeat::{HeartbeatState, Liveness};
use crate::ws::{ConnectionId, ConnectionSender};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live transport session.
///
/// The identity is bound at most once, by the registry. The connection's
/// tasks (reader, writer, heartbeat) all stop when its token is cancelled.
pub struct Connection {
    id: ConnectionId,
    identity: OnceLock<Identity>,
    outbound: ConnectionSender,
    heartbeat: Mutex<HeartbeatState>,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(outbound: ConnectionSender, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity: OnceLock::new(),
            outbound,
            heartbeat: Mutex::new(HeartbeatState::new()),
            cancel,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity().map(|i| i.user_id.as_str())
    }

    /// Returns false if an identity was already bound.
    pub(crate) fn bind_identity(&self, identity: Identity) -> bool {
        self.identity.set(identity).is_ok()
    }

    /// Queue a frame for the writer task. False once the writer is gone.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn liveness(&self) -> Liveness {
        self.heartbeat.lock().liveness()
    }

    pub fn is_dead(&self) -> bool {
        self.liveness() == Liveness::Dead
    }

    pub fn last_ping_sent_at(&self) -> Option<Instant> {
        self.heartbeat.lock().last_ping_sent_at()
    }

    pub fn pending_ack_deadline(&self) -> Option<Instant> {
        self.heartbeat.lock().pending_ack_deadline()
    }

    pub(crate) fn heartbeat_ping_sent(&self, now: Instant, ack_deadline: Duration) -> bool {
        self.heartbeat.lock().ping_sent(now, ack_deadline)
    }

    pub(crate) fn heartbeat_ack_received(&self) -> bool {
        self.heartbeat.lock().ack_received()
    }

    /// Atomically move to `Dead`. Exactly one caller ever sees `true`,
    /// and that caller owns the teardown.
    pub fn mark_dead(&self) -> bool {
        self.heartbeat.lock().kill()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity.get())
            .field("liveness", &self.liveness())
            .finish()
    }
}
