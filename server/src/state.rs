use std::path::PathBuf;
use std::sync::Arc;

use crate::attachments::AttachmentStore;
use crate::auth::jwt::TokenVerifier;
use crate::chat::router::MessageRouter;
use crate::db::store::MessageStore;
use crate::ws::actor::Relay;
use crate::ws::heartbeat::HeartbeatConfig;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Connection lifecycle owner; holds the connection registry
    pub relay: Arc<Relay>,
    /// Durable message and user store
    pub store: Arc<dyn MessageStore>,
    /// Session token verification
    pub verifier: Arc<dyn TokenVerifier>,
    /// Directory served under /uploads
    pub uploads_dir: PathBuf,
}

impl AppState {
    /// Wire the registry, router and relay around the given collaborators.
    pub fn new(
        store: Arc<dyn MessageStore>,
        attachments: Arc<dyn AttachmentStore>,
        verifier: Arc<dyn TokenVerifier>,
        heartbeat: HeartbeatConfig,
        uploads_dir: PathBuf,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(
            registry.clone(),
            store.clone(),
            attachments,
        ));
        let relay = Arc::new(Relay::new(registry, router, heartbeat));

        Self {
            relay,
            store,
            verifier,
            uploads_dir,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.relay.registry()
    }
}
