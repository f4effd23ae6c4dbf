use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use parley_server::attachments::DiskAttachmentStore;
use parley_server::auth::jwt::{load_or_generate_jwt_secret, JwtVerifier};
use parley_server::config::{generate_config_template, Config};
use parley_server::db::{self, store::SqliteStore};
use parley_server::routes;
use parley_server::state::AppState;

/// Env var that, when set, replaces the on-disk signing key.
const JWT_SECRET_ENV: &str = "PARLEY_JWT_SECRET";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Parley relay v{} starting", env!("CARGO_PKG_VERSION"));

    let heartbeat = config.heartbeat_config()?;
    let data_dir = config.data_path();
    let uploads_dir = config.uploads_path();
    std::fs::create_dir_all(&uploads_dir)?;

    let db = db::init_db(&data_dir)?;

    let jwt_secret = match std::env::var(JWT_SECRET_ENV) {
        Ok(secret) if !secret.is_empty() => {
            tracing::info!("JWT signing key taken from {}", JWT_SECRET_ENV);
            secret.into_bytes()
        }
        _ => load_or_generate_jwt_secret(&data_dir)?,
    };

    let state = AppState::new(
        Arc::new(SqliteStore::new(db)),
        Arc::new(DiskAttachmentStore::new(uploads_dir.clone())),
        Arc::new(JwtVerifier::new(&jwt_secret)),
        heartbeat,
        uploads_dir,
    );
    let relay = state.relay.clone();

    let app = routes::build_router(state, config.client_url.as_deref());

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        ping_interval_ms = heartbeat.ping_interval.as_millis() as u64,
        ack_deadline_ms = heartbeat.ack_deadline.as_millis() as u64,
        "Listening on {}",
        addr
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested, closing connections");
        relay.shutdown();
    })
    .await?;

    Ok(())
}
