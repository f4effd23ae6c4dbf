//! REST views of who is online and who the relay knows about.

use axum::{extract::State, http::StatusCode, Json};

use crate::auth::Identity;
use crate::db::models::UserSummary;
use crate::state::AppState;
use crate::ws::registry::PresenceEntry;

/// GET /api/online
///
/// Same roster the presence broadcaster pushes over the socket.
pub async fn get_online(State(state): State<AppState>) -> Json<Vec<PresenceEntry>> {
    Json(state.registry().online_roster())
}

/// GET /api/people
pub async fn list_people(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserSummary>>, StatusCode> {
    state.store.list_users().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "User listing failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/profile
pub async fn get_profile(identity: Identity) -> Json<Identity> {
    Json(identity)
}
