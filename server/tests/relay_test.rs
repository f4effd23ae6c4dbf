//! Lifecycle and routing tests driven through the relay's public API,
//! with in-process channels standing in for sockets.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use parley_server::attachments::{AttachmentRef, AttachmentStore};
use parley_server::auth::Identity;
use parley_server::chat::router::MessageRouter;
use parley_server::db::models::{NewMessage, StoredMessage, UserSummary};
use parley_server::db::store::MessageStore;
use parley_server::error::{AttachmentError, CloseReason, RouteDrop, StoreError};
use parley_server::ws::actor::Relay;
use parley_server::ws::connection::Connection;
use parley_server::ws::heartbeat::{HeartbeatConfig, Liveness};
use parley_server::ws::registry::ConnectionRegistry;

/// In-memory store that records every message it accepts.
#[derive(Default)]
struct RecordingStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl RecordingStore {
    fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let mut messages = self.messages.lock().unwrap();
        let stored = StoredMessage {
            id: format!("m-{}", messages.len() + 1),
            sender: message.sender,
            recipient: message.recipient,
            text: message.text,
            attachment_ref: message.attachment_ref,
            created_at: Utc::now(),
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn find_messages_between(
        &self,
        _user_a: &str,
        _user_b: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn remember_user(&self, _identity: &Identity) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        Ok(Vec::new())
    }
}

/// Store whose every write fails.
struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn create_message(&self, _message: NewMessage) -> Result<StoredMessage, StoreError> {
        Err(StoreError::LockPoisoned)
    }

    async fn find_messages_between(
        &self,
        _user_a: &str,
        _user_b: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Err(StoreError::LockPoisoned)
    }

    async fn remember_user(&self, _identity: &Identity) -> Result<(), StoreError> {
        Err(StoreError::LockPoisoned)
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        Err(StoreError::LockPoisoned)
    }
}

/// Attachment store that names files after a counter, or fails on demand.
#[derive(Default)]
struct StubAttachments {
    fail: bool,
}

#[async_trait]
impl AttachmentStore for StubAttachments {
    async fn stage(&self, name: &str, _bytes: Vec<u8>) -> Result<AttachmentRef, AttachmentError> {
        if self.fail {
            return Err(AttachmentError::Io(std::io::Error::other("disk full")));
        }
        Ok(format!("staged-{}", name))
    }
}

struct Harness {
    relay: Relay,
    router: Arc<MessageRouter>,
}

impl Harness {
    fn new(store: Arc<dyn MessageStore>, attachments: StubAttachments) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(
            registry.clone(),
            store,
            Arc::new(attachments),
        ));
        let relay = Relay::new(registry, router.clone(), HeartbeatConfig::default());
        Self { relay, router }
    }

    fn open(&self, identity: Option<(&str, &str)>) -> (Arc<Connection>, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = identity.map(|(id, name)| Identity::new(id, name));
        (self.relay.open(tx, identity), rx)
    }
}

/// Every JSON text frame currently queued on `rx`.
fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    frames
}

fn is_presence(frame: &Value) -> bool {
    frame.get("online").is_some()
}

#[tokio::test]
async fn test_open_announces_roster_to_everyone() {
    let harness = Harness::new(Arc::new(RecordingStore::default()), StubAttachments::default());
    let (_alice, mut alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (_anon, mut anon_rx) = harness.open(None);

    let alice_frames = drain(&mut alice_rx);
    assert_eq!(alice_frames.len(), 2);
    let latest = alice_frames.last().unwrap();
    assert_eq!(latest["online"][0]["userId"], "alice-id");
    assert_eq!(latest["online"].as_array().unwrap().len(), 1);

    // the anonymous connection sees the roster without itself
    let anon_frames = drain(&mut anon_rx);
    assert_eq!(anon_frames.len(), 1);
    assert_eq!(anon_frames[0], alice_frames[1]);
}

#[tokio::test]
async fn test_double_teardown_broadcasts_once() {
    let harness = Harness::new(Arc::new(RecordingStore::default()), StubAttachments::default());
    let (_alice, mut alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (bob, _bob_rx) = harness.open(Some(("bob-id", "bob")));
    drain(&mut alice_rx);

    assert!(harness.relay.teardown(&bob, CloseReason::LivenessTimeout));
    assert!(!harness.relay.teardown(&bob, CloseReason::StreamEnded));

    let frames = drain(&mut alice_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["online"].as_array().unwrap().len(), 1);
    assert_eq!(frames[0]["online"][0]["userId"], "alice-id");

    assert_eq!(bob.liveness(), Liveness::Dead);
    assert!(bob.cancellation().is_cancelled());
    assert!(harness.relay.registry().get(bob.id()).is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_open_connections() {
    let harness = Harness::new(Arc::new(RecordingStore::default()), StubAttachments::default());
    let (alice, _alice_rx) = harness.open(Some(("alice-id", "alice")));

    harness.relay.shutdown();
    assert!(alice.cancellation().is_cancelled());

    let (late, _late_rx) = harness.open(None);
    assert!(late.cancellation().is_cancelled());
}

#[tokio::test]
async fn test_delivers_to_every_connection_of_recipient() {
    let store = Arc::new(RecordingStore::default());
    let harness = Harness::new(store.clone(), StubAttachments::default());
    let (alice, mut alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (_bob1, mut bob1_rx) = harness.open(Some(("bob-id", "bob")));
    let (_bob2, mut bob2_rx) = harness.open(Some(("bob-id", "bob")));
    drain(&mut alice_rx);
    drain(&mut bob1_rx);
    drain(&mut bob2_rx);

    let routed = harness
        .router
        .route(&alice, r#"{"recipient":"bob-id","text":"hi"}"#)
        .await
        .unwrap();
    assert_eq!(routed.deliveries, 2);
    assert_eq!(store.count(), 1);

    for rx in [&mut bob1_rx, &mut bob2_rx] {
        let frames = drain(rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["text"], "hi");
        assert_eq!(frames[0]["id"], "m-1");
    }
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn test_offline_recipient_is_persisted_only() {
    let store = Arc::new(RecordingStore::default());
    let harness = Harness::new(store.clone(), StubAttachments::default());
    let (alice, _alice_rx) = harness.open(Some(("alice-id", "alice")));

    let routed = harness
        .router
        .route(&alice, r#"{"recipient":"carol-id","text":"later"}"#)
        .await
        .unwrap();
    assert_eq!(routed.deliveries, 0);
    assert_eq!(routed.message.recipient, "carol-id");
    assert_eq!(store.count(), 1);
}

#[tokio::test]
async fn test_persistence_failure_drops_message() {
    let harness = Harness::new(Arc::new(FailingStore), StubAttachments::default());
    let (alice, _alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (_bob, mut bob_rx) = harness.open(Some(("bob-id", "bob")));
    drain(&mut bob_rx);

    let outcome = harness
        .router
        .route(&alice, r#"{"recipient":"bob-id","text":"lost"}"#)
        .await;
    assert!(matches!(outcome, Err(RouteDrop::Persistence(_))));
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn test_attachment_failure_keeps_text() {
    let store = Arc::new(RecordingStore::default());
    let harness = Harness::new(store.clone(), StubAttachments { fail: true });
    let (alice, _alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (_bob, mut bob_rx) = harness.open(Some(("bob-id", "bob")));
    drain(&mut bob_rx);

    let raw = r#"{"recipient":"bob-id","text":"see file","file":{"name":"a.png","data":"data:image/png;base64,AAAA"}}"#;
    let routed = harness.router.route(&alice, raw).await.unwrap();
    assert_eq!(routed.message.attachment_ref, None);
    assert_eq!(routed.message.text.as_deref(), Some("see file"));

    let frames = drain(&mut bob_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["text"], "see file");
    assert!(frames[0]["attachmentRef"].is_null());
}

#[tokio::test]
async fn test_failed_attachment_without_text_is_dropped() {
    let store = Arc::new(RecordingStore::default());
    let harness = Harness::new(store.clone(), StubAttachments { fail: true });
    let (alice, _alice_rx) = harness.open(Some(("alice-id", "alice")));

    let raw = r#"{"recipient":"bob-id","attachment":{"name":"a.png","data":"data:image/png;base64,AAAA"}}"#;
    let outcome = harness.router.route(&alice, raw).await;
    assert!(matches!(outcome, Err(RouteDrop::EmptyMessage)));
    assert_eq!(store.count(), 0);
}

#[tokio::test]
async fn test_staged_attachment_reference_is_delivered() {
    let store = Arc::new(RecordingStore::default());
    let harness = Harness::new(store.clone(), StubAttachments::default());
    let (alice, _alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (_bob, mut bob_rx) = harness.open(Some(("bob-id", "bob")));
    drain(&mut bob_rx);

    let raw = r#"{"recipient":"bob-id","file":{"name":"a.png","data":"data:image/png;base64,AAAA"}}"#;
    let routed = harness.router.route(&alice, raw).await.unwrap();
    assert_eq!(routed.message.attachment_ref.as_deref(), Some("staged-a.png"));

    let frames = drain(&mut bob_rx);
    assert_eq!(frames[0]["attachmentRef"], "staged-a.png");
    assert!(frames[0]["text"].is_null());
}

#[tokio::test]
async fn test_events_that_never_reach_the_store() {
    let store = Arc::new(RecordingStore::default());
    let harness = Harness::new(store.clone(), StubAttachments::default());
    let (alice, _alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (anon, _anon_rx) = harness.open(None);

    let cases = [
        (&anon, r#"{"recipient":"alice-id","text":"hello"}"#),
        (&alice, r#"{"recipient":"bob-id","text":""}"#),
        (&alice, r#"{"text":"nobody"}"#),
        (&alice, r#"{"recipient":"bob-id"}"#),
        (&alice, "not json at all"),
    ];
    for (conn, raw) in cases {
        assert!(harness.router.route(conn, raw).await.is_err(), "accepted {raw}");
    }

    assert!(matches!(
        harness.router.route(&anon, r#"{"recipient":"x","text":"y"}"#).await,
        Err(RouteDrop::Unauthenticated)
    ));
    assert!(matches!(
        harness.router.route(&alice, r#"{"recipient":"","text":"lost"}"#).await,
        Err(RouteDrop::MissingRecipient)
    ));
    assert!(matches!(
        harness.router.route(&alice, r#"{"recipient":"bob-id","text":""}"#).await,
        Err(RouteDrop::EmptyMessage)
    ));
    assert!(matches!(
        harness.router.route(&alice, "[1,2").await,
        Err(RouteDrop::MalformedEvent(_))
    ));
    assert_eq!(store.count(), 0);
}

#[tokio::test]
async fn test_presence_ignores_message_frames() {
    let harness = Harness::new(Arc::new(RecordingStore::default()), StubAttachments::default());
    let (alice, mut alice_rx) = harness.open(Some(("alice-id", "alice")));
    let (_bob, _bob_rx) = harness.open(Some(("bob-id", "bob")));

    harness
        .router
        .route(&alice, r#"{"recipient":"alice-id","text":"note to self"}"#)
        .await
        .unwrap();

    let frames = drain(&mut alice_rx);
    assert_eq!(frames.iter().filter(|f| is_presence(f)).count(), 2);
    assert_eq!(frames.last().unwrap()["text"], "note to self");
}
