use std::net::SocketAddr;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::binder::bind_identity;
use crate::state::AppState;

/// Query parameters for the WebSocket upgrade.
/// `token` is only consulted when no `token` cookie is present.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws
///
/// Upgrades unconditionally. A missing or invalid session token leaves the
/// connection anonymous: it receives presence but cannot send, and is not
/// listed as online.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match bind_identity(
        state.verifier.as_ref(),
        &headers,
        params.token.as_deref(),
    )
    .await
    {
        Ok(identity) => {
            tracing::info!(
                peer = %peer,
                user_id = %identity.user_id,
                username = %identity.username,
                "WebSocket connection authenticated"
            );
            let store = state.store.clone();
            let seen = identity.clone();
            tokio::spawn(async move {
                if let Err(e) = store.remember_user(&seen).await {
                    tracing::warn!(user_id = %seen.user_id, error = %e, "Failed to record user");
                }
            });
            Some(identity)
        }
        Err(failure) => {
            tracing::warn!(
                peer = %peer,
                reason = %failure,
                "WebSocket auth failed, continuing anonymously"
            );
            None
        }
    };

    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| relay.run_connection(socket, identity))
}
