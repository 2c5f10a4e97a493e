//! SQLite storage for snapshots and the delta log.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so readers never block the single writer
//! - `busy_timeout` from [`StoreConfig`] so competing writers queue instead of failing
//! - `foreign_keys = ON` so every delta row points at an existing snapshot

pub mod codec;
pub mod delta_log;
pub mod migrations;
pub mod schema;
pub mod snapshot;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::config::StoreConfig;

/// Open (or create) the store database at `config.db_path`, apply runtime
/// pragmas, and migrate the schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_store(config: &StoreConfig) -> Result<Connection> {
    let path = config.db_path.as_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store directory {}", parent.display()))?;
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("open store database {}", path.display()))?;

    configure_connection(&conn, config).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;

    tracing::debug!(path = %path.display(), "opened user store");
    Ok(conn)
}

/// Open a private in-memory store with the latest schema.
///
/// # Errors
///
/// Returns an error if configuring or migrating the database fails.
pub fn open_in_memory(config: &StoreConfig) -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory store")?;
    configure_connection(&conn, config).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, config: &StoreConfig) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", config.synchronous.as_pragma())?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(config.busy_timeout())?;
    Ok(())
}
