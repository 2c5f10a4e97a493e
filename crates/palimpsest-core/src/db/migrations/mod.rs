//! SQLite schema migrations for the user store.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[(1, schema::MIGRATION_V1_SQL), (2, schema::MIGRATION_V2_SQL)];

/// Read `PRAGMA user_version` and convert it to a Rust `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the version value cannot be
/// represented as `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
///
/// A migration only runs when its version is above `user_version`, and its
/// DDL uses `IF NOT EXISTS`, so running this twice is a no-op.
///
/// # Errors
///
/// Returns an error if any migration fails; the failing migration is rolled
/// back as a whole.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(*version)],
        )?;
        tx.commit()?;
        tracing::debug!(version, "applied store migration");
        current = *version;
    }

    ensure_guards(conn)?;
    Ok(current)
}

/// Reinstall any guard trigger that is missing from a migrated database.
///
/// # Errors
///
/// Returns an error if the trigger lookup or re-creation fails.
pub fn ensure_guards(conn: &Connection) -> rusqlite::Result<()> {
    let mut missing = Vec::new();
    for trigger in schema::REQUIRED_TRIGGERS {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'trigger' AND name = ?1)",
            [trigger],
            |row| row.get(0),
        )?;
        if !exists {
            missing.push(*trigger);
        }
    }
    if missing.is_empty() {
        return Ok(());
    }

    tracing::warn!(?missing, "reinstalling store guard triggers");
    conn.execute_batch(schema::MIGRATION_V2_SQL)
}
