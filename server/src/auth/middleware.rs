use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::auth::binder::{token_from_bearer, token_from_cookies};
use crate::auth::Identity;
use crate::state::AppState;

/// Identity extractor for REST handlers.
/// Reads the `token` cookie, falling back to `Authorization: Bearer`.
impl FromRequestParts<AppState> for Identity {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_cookies(&parts.headers)
            .or_else(|| token_from_bearer(&parts.headers))
            .filter(|t| !t.is_empty())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        state
            .verifier
            .verify(token)
            .await
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}
