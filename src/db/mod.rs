pub mod migrations;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

/// Shared handle to the user/chat store. rusqlite is synchronous, so
/// handlers take the lock inside `tokio::task::spawn_blocking`; the live
/// broker never touches this connection.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open (or create) the store under `data_dir` and bring the schema up to
/// date. WAL keeps readers off the writers' backs; foreign keys are
/// enforced because `chat_users` and `messages` reference both parents.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("pairchat.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!(path = %db_path.display(), "User/chat store ready");

    Ok(Arc::new(Mutex::new(conn)))
}
