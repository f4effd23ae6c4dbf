//! Per-connection liveness checking.
//!
//! Each connection cycles `Alive -> AwaitingAck -> Alive` once per ping
//! interval. A missing pong within the ack deadline ends the cycle with
//! [`HeartbeatExit::TimedOut`]; the caller tears the connection down, which is
//! the `-> Dead` transition. Application frames never count as an ack.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use crate::ws::connection::Connection;

const PING_PAYLOAD: &[u8] = b"parley-hb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    AwaitingAck,
    Dead,
}

/// Heartbeat timing. Defaults: ping every 5s, 1s to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub ping_interval: Duration,
    pub ack_deadline: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            ack_deadline: Duration::from_secs(1),
        }
    }
}

/// Liveness state of one connection.
#[derive(Debug)]
pub struct HeartbeatState {
    liveness: Liveness,
    last_ping_sent_at: Option<Instant>,
    pending_ack_deadline: Option<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    pub fn new() -> Self {
        Self {
            liveness: Liveness::Alive,
            last_ping_sent_at: None,
            pending_ack_deadline: None,
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn last_ping_sent_at(&self) -> Option<Instant> {
        self.last_ping_sent_at
    }

    pub fn pending_ack_deadline(&self) -> Option<Instant> {
        self.pending_ack_deadline
    }

    /// `Alive -> AwaitingAck`. Returns false in any other state.
    pub fn ping_sent(&mut self, now: Instant, ack_deadline: Duration) -> bool {
        if self.liveness != Liveness::Alive {
            return false;
        }
        self.liveness = Liveness::AwaitingAck;
        self.last_ping_sent_at = Some(now);
        self.pending_ack_deadline = Some(now + ack_deadline);
        true
    }

    /// `AwaitingAck -> Alive`. Acks in any other state are ignored.
    pub fn ack_received(&mut self) -> bool {
        if self.liveness != Liveness::AwaitingAck {
            return false;
        }
        self.liveness = Liveness::Alive;
        self.pending_ack_deadline = None;
        true
    }

    /// Transition to `Dead`. Returns true only for the call that performed it.
    pub fn kill(&mut self) -> bool {
        if self.liveness == Liveness::Dead {
            return false;
        }
        self.liveness = Liveness::Dead;
        self.pending_ack_deadline = None;
        true
    }
}

/// How a heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// A ping went unanswered past the ack deadline.
    TimedOut,
    /// The connection died or its outbound channel closed first.
    ConnectionGone,
}

/// Drive the heartbeat for `conn` until it times out or the connection goes away.
///
/// `acks` receives one unit per pong read off the socket. Cancellation is
/// the caller's job: this future is raced against the connection's token.
pub async fn run_heartbeat(
    conn: Arc<Connection>,
    config: HeartbeatConfig,
    mut acks: mpsc::UnboundedReceiver<()>,
) -> HeartbeatExit {
    loop {
        sleep(config.ping_interval).await;

        // pongs that arrived while Alive do not answer the next ping
        while acks.try_recv().is_ok() {}

        if !conn.heartbeat_ping_sent(Instant::now(), config.ack_deadline) {
            return HeartbeatExit::ConnectionGone;
        }
        if !conn.send(Message::Ping(Bytes::from_static(PING_PAYLOAD))) {
            return HeartbeatExit::ConnectionGone;
        }

        match timeout(config.ack_deadline, acks.recv()).await {
            Ok(Some(())) => {
                conn.heartbeat_ack_received();
            }
            Ok(None) => return HeartbeatExit::ConnectionGone,
            Err(_) => {
                tracing::warn!(
                    conn_id = conn.id(),
                    user_id = conn.user_id().unwrap_or("-"),
                    "Pong timeout"
                );
                return HeartbeatExit::TimedOut;
            }
        }
    }
}
