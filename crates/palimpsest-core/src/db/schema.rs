//! Canonical SQLite schema for the user store.
//!
//! - `users` holds exactly one current row (the snapshot) per identity
//! - `user_deltas` is the append-only undo log: one row per accepted
//!   mutation, keyed by `(user_id, revision)`, carrying the pre-change value
//!   of each field flagged in `mask`
//! - `store_meta` mirrors the schema version for diagnostics

/// Migration v1: snapshot table, delta log and store metadata.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    dob TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'guest' CHECK (role IN ('guest', 'support', 'admin')),
    revision INTEGER NOT NULL DEFAULT 0 CHECK (revision >= 0),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_deltas (
    user_id TEXT NOT NULL REFERENCES users(id),
    revision INTEGER NOT NULL CHECK (revision > 0),
    mask INTEGER NOT NULL CHECK (mask > 0),
    name TEXT,
    dob TEXT,
    role TEXT CHECK (role IS NULL OR role IN ('guest', 'support', 'admin')),
    recorded_at_us INTEGER NOT NULL,
    PRIMARY KEY (user_id, revision)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, created_at_us)
VALUES (1, 1, CAST((julianday('now') - 2440587.5) * 86400000000 AS INTEGER));
"#;

/// Migration v2: enforce immutability of the delta log and of snapshot
/// existence at the engine level. Every statement is idempotent, so this is
/// also replayed to reinstall guards dropped after the fact.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS user_deltas_no_update
BEFORE UPDATE ON user_deltas
BEGIN
    SELECT RAISE(ABORT, 'user_deltas is append-only');
END;

CREATE TRIGGER IF NOT EXISTS user_deltas_no_delete
BEFORE DELETE ON user_deltas
BEGIN
    SELECT RAISE(ABORT, 'user_deltas is append-only');
END;

CREATE TRIGGER IF NOT EXISTS users_no_delete
BEFORE DELETE ON users
BEGIN
    SELECT RAISE(ABORT, 'users are never deleted');
END;

CREATE TRIGGER IF NOT EXISTS users_revision_advances_by_one
BEFORE UPDATE OF revision ON users
WHEN new.revision <> old.revision + 1
BEGIN
    SELECT RAISE(ABORT, 'revision must advance by exactly one');
END;
"#;

/// Triggers expected after all migrations have run.
pub const REQUIRED_TRIGGERS: &[&str] = &[
    "user_deltas_no_update",
    "user_deltas_no_delete",
    "users_no_delete",
    "users_revision_advances_by_one",
];
