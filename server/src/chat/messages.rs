//! REST endpoint for direct-message history.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::Identity;
use crate::db::models::StoredMessage;
use crate::state::AppState;

/// GET /api/messages/{user_id}
///
/// Every message exchanged between the caller and `user_id`, in either
/// direction, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    identity: Identity,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, StatusCode> {
    let messages = state
        .store
        .find_messages_between(&identity.user_id, &user_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %identity.user_id, error = %e, "History query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}
