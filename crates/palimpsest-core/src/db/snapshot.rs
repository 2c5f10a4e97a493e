//! Snapshot store: exactly one current row per user.
//!
//! Reads are public. The only writers are [`insert`] (creation) and
//! [`compare_and_set`] (mutation), both crate-private so that no caller can
//! change a snapshot without the delta record that documents the change.

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::codec::DeltaColumns;
use crate::model::{BASE_REVISION, Patch, Revision, User, UserId};

const SELECT_USER_SQL: &str = "SELECT id, name, dob, role, revision FROM users WHERE id = ?1";

const SELECT_USER_AT_SQL: &str =
    "SELECT id, name, dob, role, revision FROM users WHERE id = ?1 AND revision = ?2";

// Patched columns arrive as non-NULL values; unpatched ones as NULL and keep
// their current value. The revision predicate is the compare in
// compare-and-set.
const COMPARE_AND_SET_SQL: &str = "
UPDATE users SET
    name = COALESCE(?3, name),
    dob = COALESCE(?4, dob),
    role = COALESCE(?5, role),
    revision = ?6,
    updated_at_us = ?7
WHERE id = ?1 AND revision = ?2";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(User, Revision)> {
    let user = User {
        id: row.get(0)?,
        name: row.get(1)?,
        dob: row.get(2)?,
        role: row.get(3)?,
    };
    Ok((user, row.get(4)?))
}

/// Insert a new snapshot at [`BASE_REVISION`].
pub(crate) fn insert(conn: &Connection, user: &User, now_us: i64) -> rusqlite::Result<()> {
    conn.prepare_cached(
        "INSERT INTO users (id, name, dob, role, revision, created_at_us, updated_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
    )?
    .execute(params![user.id, user.name, user.dob, user.role, BASE_REVISION, now_us])?;
    Ok(())
}

/// Point lookup of the current snapshot and its revision.
///
/// # Errors
///
/// Returns an error if the query fails or a stored value cannot be decoded.
pub fn get(conn: &Connection, id: &UserId) -> rusqlite::Result<Option<(User, Revision)>> {
    conn.prepare_cached(SELECT_USER_SQL)?
        .query_row(params![id], user_from_row)
        .optional()
}

/// The snapshot, only if it is currently at exactly `revision`.
///
/// # Errors
///
/// Returns an error if the query fails or a stored value cannot be decoded.
pub fn get_if_at(
    conn: &Connection,
    id: &UserId,
    revision: Revision,
) -> rusqlite::Result<Option<User>> {
    conn.prepare_cached(SELECT_USER_AT_SQL)?
        .query_row(params![id, revision], user_from_row)
        .optional()
        .map(|found| found.map(|(user, _)| user))
}

/// Current revision of `id`, if it exists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn revision_of(conn: &Connection, id: &UserId) -> rusqlite::Result<Option<Revision>> {
    conn.prepare_cached("SELECT revision FROM users WHERE id = ?1")?
        .query_row(params![id], |row| row.get(0))
        .optional()
}

/// Number of snapshots in the store.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
}

/// Apply `patch` and advance the revision to `expected + 1`, but only if the
/// row is still at `expected`. Returns the affected-row count: 1 on success,
/// 0 when the identity is absent or has moved on.
pub(crate) fn compare_and_set(
    conn: &Connection,
    id: &UserId,
    expected: Revision,
    next: Revision,
    patch: &Patch,
    now_us: i64,
) -> rusqlite::Result<usize> {
    let columns = DeltaColumns::from_patch(patch);
    conn.prepare_cached(COMPARE_AND_SET_SQL)?.execute(params![
        id,
        expected,
        columns.name,
        columns.dob,
        columns.role,
        next,
        now_us
    ])
}
