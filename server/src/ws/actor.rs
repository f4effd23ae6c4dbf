use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::chat::router::InboundHandler;
use crate::error::CloseReason;
use crate::ws::connection::Connection;
use crate::ws::heartbeat::{run_heartbeat, HeartbeatConfig, HeartbeatExit};
use crate::ws::presence::broadcast_presence;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::ConnectionSender;

/// How long the writer may spend sending a close frame to a departing peer.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Owns the connection lifecycle: registration, heartbeat, teardown.
/// Message semantics live entirely behind the [`InboundHandler`].
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    inbound: Arc<dyn InboundHandler>,
    heartbeat: HeartbeatConfig,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        inbound: Arc<dyn InboundHandler>,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            inbound,
            heartbeat,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Cancel every connection. Each tears itself down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Create and register a connection, bind its identity if one was
    /// verified, and announce the new roster.
    pub fn open(&self, outbound: ConnectionSender, identity: Option<Identity>) -> Arc<Connection> {
        let conn = Connection::new(outbound, self.shutdown.child_token());
        self.registry.register(conn.clone());

        if let Some(identity) = identity {
            if let Err(e) = self.registry.set_identity(conn.id(), identity) {
                tracing::warn!(conn_id = conn.id(), error = %e, "Identity not bound");
            }
        }

        tracing::info!(
            conn_id = conn.id(),
            user_id = conn.user_id().unwrap_or("-"),
            "Connection opened"
        );
        broadcast_presence(&self.registry);
        conn
    }

    /// Remove `conn`, stop its tasks and close its transport.
    ///
    /// Safe to call from every terminal path at once: only the caller that
    /// moves the connection to `Dead` does the work and triggers the presence
    /// broadcast. Returns whether this call was that caller.
    pub fn teardown(&self, conn: &Connection, reason: CloseReason) -> bool {
        if !conn.mark_dead() {
            return false;
        }

        self.registry.remove(conn.id());
        conn.cancellation().cancel();

        tracing::info!(
            conn_id = conn.id(),
            user_id = conn.user_id().unwrap_or("-"),
            reason = %reason,
            "Connection closed"
        );
        broadcast_presence(&self.registry);
        true
    }

    /// Run one upgraded socket until it closes.
    ///
    /// Splits the socket: a writer task owns the sink and drains the
    /// connection's outbound channel, an inbound worker routes text frames
    /// one at a time in arrival order, and a heartbeat task pings and
    /// enforces the ack deadline. This task only reads and forwards, so a
    /// pong is never stuck behind a slow store write.
    pub async fn run_connection(self: Arc<Self>, socket: WebSocket, identity: Option<Identity>) {
        let (ws_sender, mut ws_receiver) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel::<Message>();

        let conn = self.open(tx, identity);
        let cancel = conn.cancellation().clone();

        let writer_handle = tokio::spawn(writer_task(ws_sender, rx, cancel.clone()));

        let (ack_tx, ack_rx) = mpsc::unbounded_channel::<()>();
        let heartbeat_handle = {
            let relay = self.clone();
            let conn = conn.clone();
            let cancel = cancel.clone();
            let config = self.heartbeat;
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    exit = run_heartbeat(conn.clone(), config, ack_rx) => {
                        if exit == HeartbeatExit::TimedOut {
                            relay.teardown(&conn, CloseReason::LivenessTimeout);
                        }
                    }
                }
            })
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Utf8Bytes>();
        let inbound_handle = tokio::spawn(inbound_worker(
            self.inbound.clone(),
            conn.clone(),
            inbound_rx,
            cancel.clone(),
        ));

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break CloseReason::Shutdown,
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        // the worker only goes away once the connection is cancelled
                        let _ = inbound_tx.send(text);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!(
                            conn_id = conn.id(),
                            bytes = data.len(),
                            "Ignoring binary frame"
                        );
                    }
                    Some(Ok(Message::Pong(_))) => {
                        let _ = ack_tx.send(());
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // answered by the websocket layer
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(conn_id = conn.id(), frame = ?frame, "Client initiated close");
                        break CloseReason::ClientClosed;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(conn_id = conn.id(), error = %e, "WebSocket receive error");
                        break CloseReason::TransportError;
                    }
                    None => break CloseReason::StreamEnded,
                },
            }
        };

        // no-op if the heartbeat or shutdown already tore it down
        self.teardown(&conn, reason);

        drop(inbound_tx);
        let _ = inbound_handle.await;
        let _ = heartbeat_handle.await;
        let _ = writer_handle.await;
    }
}

/// Route queued text frames strictly in order until the reader stops
/// forwarding or the connection is cancelled.
async fn inbound_worker(
    inbound: Arc<dyn InboundHandler>,
    conn: Arc<Connection>,
    mut frames: mpsc::UnboundedReceiver<Utf8Bytes>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(text) => {
                    let _ = inbound.handle(&conn, text.as_str()).await;
                }
                None => break,
            },
        }
    }
}

/// Forward queued frames to the socket until the connection is cancelled
/// or the peer stops accepting writes.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, ws_sender.close()).await;
}
