pub mod migrations;
pub mod models;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;

/// Type alias for the shared database connection.
/// rusqlite is synchronous: every call goes through `spawn_blocking`.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open (or create) `data_dir/parley.db`, enable WAL, and run migrations.
pub fn init_db(data_dir: &Path) -> Result<DbPool, StoreError> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("parley.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}
