use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::chat::{messages, presence};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
///
/// `client_url`, when set, is the single browser origin allowed to call the
/// API with cookies.
pub fn build_router(state: AppState, client_url: Option<&str>) -> Router {
    // WebSocket endpoint (auth via cookie or ?token=, never rejected)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Authenticated routes (Identity extractor validates the token)
    let authenticated_routes = Router::new()
        .route("/api/messages/{user_id}", get(messages::get_conversation))
        .route("/api/profile", get(presence::get_profile));

    let public_routes = Router::new()
        .route("/api/people", get(presence::list_people))
        .route("/api/online", get(presence::get_online))
        .route("/health", get(health_check));

    let uploads = ServeDir::new(&state.uploads_dir);

    let router = Router::new()
        .merge(ws_routes)
        .merge(authenticated_routes)
        .merge(public_routes)
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    match client_url.map(cors_layer).transpose() {
        Ok(Some(cors)) => router.layer(cors),
        Ok(None) => router,
        Err(origin) => {
            tracing::warn!(origin = %origin, "Ignoring unparseable client_url, CORS disabled");
            router
        }
    }
}

fn cors_layer(origin: &str) -> Result<CorsLayer, String> {
    let origin = HeaderValue::from_str(origin.trim_end_matches('/'))
        .map_err(|_| origin.to_string())?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true))
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
