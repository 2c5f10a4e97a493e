//! Delta log: the append-only undo log of per-user partial updates.
//!
//! Each record is stamped with the revision its change *produced* and holds
//! the pre-change value of every field that change touched. Records are
//! written once, by the compare-and-set path, inside the same transaction as
//! the snapshot update; the schema rejects later updates and deletes.
//!
//! Reads stream rows newest-first straight from a prepared statement.
//! Nothing is cached between calls, so every scan is an independent read.

use rusqlite::{Connection, params};

use super::codec::DeltaColumns;
use crate::error::StoreError;
use crate::model::{Patch, Revision, UserId};

const SCAN_DESC_SQL: &str = "
SELECT revision, mask, name, dob, role
FROM user_deltas
WHERE user_id = ?1 AND revision > ?2
ORDER BY revision DESC";

/// One immutable undo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRecord {
    pub user_id: UserId,
    /// Revision of the snapshot immediately after this change.
    pub revision: Revision,
    /// Values of the changed fields immediately before this change.
    pub pre_image: Patch,
}

/// Append one record. Must run inside the transaction that performed the
/// snapshot update it documents.
pub(crate) fn append(conn: &Connection, record: &DeltaRecord, now_us: i64) -> rusqlite::Result<()> {
    let columns = DeltaColumns::from_patch(&record.pre_image);
    conn.prepare_cached(
        "INSERT INTO user_deltas (user_id, revision, mask, name, dob, role, recorded_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?
    .execute(params![
        record.user_id,
        record.revision,
        columns.mask,
        columns.name,
        columns.dob,
        columns.role,
        now_us
    ])?;
    Ok(())
}

/// Left-fold `f` over the records of `id` with `revision > above`, in
/// strictly descending revision order.
///
/// Rows are decoded one at a time; `f` may stop the scan early by returning
/// an error.
///
/// # Errors
///
/// Returns [`StoreError::StorageFailure`] on engine errors,
/// [`StoreError::CorruptDelta`] for undecodable rows, or whatever `f` returns.
pub fn fold_desc<B>(
    conn: &Connection,
    id: &UserId,
    above: Revision,
    init: B,
    mut f: impl FnMut(B, DeltaRecord) -> Result<B, StoreError>,
) -> Result<B, StoreError> {
    let storage = |e| StoreError::storage("delta_scan", Some(id), e);

    let mut stmt = conn.prepare_cached(SCAN_DESC_SQL).map_err(storage)?;
    let mut rows = stmt.query(params![id, above]).map_err(storage)?;

    let mut acc = init;
    while let Some(row) = rows.next().map_err(storage)? {
        let revision: Revision = row.get(0).map_err(storage)?;
        let columns = DeltaColumns {
            mask: row.get(1).map_err(storage)?,
            name: row.get(2).map_err(storage)?,
            dob: row.get(3).map_err(storage)?,
            role: row.get(4).map_err(storage)?,
        };
        let pre_image = columns.into_patch().map_err(|detail| StoreError::CorruptDelta {
            id: *id,
            revision,
            detail,
        })?;

        acc = f(
            acc,
            DeltaRecord {
                user_id: *id,
                revision,
                pre_image,
            },
        )?;
    }
    Ok(acc)
}

/// Collect the records of `id` with `revision > above`, newest first.
///
/// # Errors
///
/// Same as [`fold_desc`].
pub fn scan(conn: &Connection, id: &UserId, above: Revision) -> Result<Vec<DeltaRecord>, StoreError> {
    fold_desc(conn, id, above, Vec::new(), |mut records, record| {
        records.push(record);
        Ok(records)
    })
}

/// Number of records stored for `id`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count(conn: &Connection, id: &UserId) -> rusqlite::Result<u64> {
    conn.prepare_cached("SELECT COUNT(*) FROM user_deltas WHERE user_id = ?1")?
        .query_row(params![id], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::db::{open_in_memory, snapshot};
    use crate::model::{Name, Role, User, user::parse_date};

    fn test_db_with_user() -> (Connection, UserId) {
        let conn = open_in_memory(&StoreConfig::default()).expect("open in-memory store");
        let user = User {
            id: UserId::new(),
            name: Name::parse("Ada").expect("name"),
            dob: parse_date("1815-12-10").expect("date"),
            role: Role::Guest,
        };
        snapshot::insert(&conn, &user, 1).expect("insert user");
        (conn, user.id)
    }

    fn record(id: UserId, revision: Revision, name: &str) -> DeltaRecord {
        DeltaRecord {
            user_id: id,
            revision,
            pre_image: Patch::new().name(Name::parse(name).expect("name")),
        }
    }

    #[test]
    fn scan_is_descending_and_bounded_below() -> Result<(), StoreError> {
        let (conn, id) = test_db_with_user();
        for (revision, name) in [(1, "Ada"), (2, "Alan"), (3, "Grace")] {
            append(&conn, &record(id, revision, name), 1).expect("append");
        }

        let all: Vec<_> = scan(&conn, &id, 0)?.into_iter().map(|r| r.revision).collect();
        assert_eq!(all, vec![3, 2, 1]);

        let above_one: Vec<_> = scan(&conn, &id, 1)?.into_iter().map(|r| r.revision).collect();
        assert_eq!(above_one, vec![3, 2]);

        assert!(scan(&conn, &id, 3)?.is_empty());
        Ok(())
    }

    #[test]
    fn scans_are_restartable() -> Result<(), StoreError> {
        let (conn, id) = test_db_with_user();
        append(&conn, &record(id, 1, "Ada"), 1).expect("append");
        let first = scan(&conn, &id, 0)?;
        let second = scan(&conn, &id, 0)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn scan_is_per_user() -> Result<(), StoreError> {
        let (conn, id) = test_db_with_user();
        append(&conn, &record(id, 1, "Ada"), 1).expect("append");
        assert!(scan(&conn, &UserId::new(), 0)?.is_empty());
        assert_eq!(count(&conn, &id).expect("count"), 1);
        Ok(())
    }

    #[test]
    fn duplicate_revision_is_rejected() {
        let (conn, id) = test_db_with_user();
        append(&conn, &record(id, 1, "Ada"), 1).expect("append");
        assert!(append(&conn, &record(id, 1, "Alan"), 2).is_err());
    }

    #[test]
    fn records_are_immutable() {
        let (conn, id) = test_db_with_user();
        append(&conn, &record(id, 1, "Ada"), 1).expect("append");
        assert!(conn.execute("UPDATE user_deltas SET name = 'Eve'", []).is_err());
        assert!(conn.execute("DELETE FROM user_deltas", []).is_err());
    }

    #[test]
    fn fold_stops_on_first_error() {
        let (conn, id) = test_db_with_user();
        for revision in 1..=3 {
            append(&conn, &record(id, revision, "Ada"), 1).expect("append");
        }
        let mut visited = 0;
        let result = fold_desc(&conn, &id, 0, (), |(), record| {
            visited += 1;
            if record.revision == 2 {
                Err(StoreError::EmptyPatch { id })
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(StoreError::EmptyPatch { .. })));
        assert_eq!(visited, 2);
    }

    #[test]
    fn corrupt_row_is_reported_with_revision() {
        let (conn, id) = test_db_with_user();
        conn.execute(
            "INSERT INTO user_deltas (user_id, revision, mask, recorded_at_us) VALUES (?1, 1, 4, 1)",
            params![id],
        )
        .expect("insert raw row");

        let err = scan(&conn, &id, 0).expect_err("role flagged without value");
        assert!(matches!(err, StoreError::CorruptDelta { revision: 1, .. }));
    }
}
