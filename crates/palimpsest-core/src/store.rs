//! The user store: create, read, compare-and-set mutation and point-in-time
//! reads over one SQLite connection.
//!
//! A `UserStore` owns a single connection and is meant to be used from one
//! thread at a time. Concurrency comes from opening one store per worker
//! against the same database file; SQLite serializes writers and the
//! revision predicate in every mutation decides which of two racing writers
//! wins.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, InterruptHandle, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::db::{self, delta_log, delta_log::DeltaRecord, snapshot};
use crate::error::StoreError;
use crate::model::{BASE_REVISION, MAX_REVISION, Name, Patch, Revision, Role, User, UserId};
use crate::reconstruct::{HistoryBuilder, HistoryEntry, Rewind};

/// SQLite VM instructions between deadline checks.
const DEADLINE_CHECK_INTERVAL: i32 = 1_000;

/// Versioned user records backed by SQLite.
pub struct UserStore {
    conn: Connection,
    op_timeout: Option<Duration>,
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("path", &self.conn.path())
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl UserStore {
    /// Open (or create) the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened, configured or
    /// migrated.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = db::open_store(config)?;
        Ok(Self {
            conn,
            op_timeout: config.op_timeout(),
        })
    }

    /// Open the database at `path` with default settings.
    ///
    /// # Errors
    ///
    /// Same as [`UserStore::open`].
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig::at(path.as_ref()))
    }

    /// A private, empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let config = StoreConfig::default();
        Ok(Self {
            conn: db::open_in_memory(&config)?,
            op_timeout: None,
        })
    }

    /// Read-only access to the underlying connection, for diagnostics.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Handle that cancels the operation currently running on this store
    /// from another thread. The cancelled operation fails with
    /// [`StoreError::Interrupted`] and persists nothing.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    /// Set or clear the deadline applied to each subsequent operation.
    pub const fn set_op_timeout(&mut self, timeout: Option<Duration>) {
        self.op_timeout = timeout;
    }

    /// Create a user at [`BASE_REVISION`]. No delta record is written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageFailure`] if the insert fails, or
    /// [`StoreError::Interrupted`] if the operation was cancelled.
    pub fn create(&mut self, name: Name, dob: NaiveDate, role: Role) -> Result<UserId, StoreError> {
        const OP: &str = "create";
        let user = User {
            id: UserId::new(),
            name,
            dob,
            role,
        };
        let _deadline = self.arm_deadline();

        snapshot::insert(&self.conn, &user, now_us())
            .map_err(|e| StoreError::storage(OP, Some(&user.id), e))?;

        info!(user_id = %user.id, revision = BASE_REVISION, "created user");
        Ok(user.id)
    }

    /// Current snapshot and its revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `id` has no snapshot.
    pub fn get(&self, id: &UserId) -> Result<(User, Revision), StoreError> {
        const OP: &str = "get";
        let _deadline = self.arm_deadline();

        let found = snapshot::get(&self.conn, id).map_err(|e| StoreError::storage(OP, Some(id), e))?;
        let (user, revision) = found.ok_or(StoreError::NotFound { id: *id })?;
        debug!(user_id = %id, revision, "read user");
        Ok((user, revision))
    }

    /// Apply `patch` if the user is still at `expected`; returns the new
    /// revision.
    ///
    /// The snapshot update and the delta record holding the pre-change
    /// values commit together or not at all.
    ///
    /// # Errors
    ///
    /// - [`StoreError::EmptyPatch`] if `patch` changes nothing
    /// - [`StoreError::NotFound`] if `id` has no snapshot
    /// - [`StoreError::ConcurrencyConflict`] if the revision has moved past `expected`
    /// - [`StoreError::StorageFailure`] / [`StoreError::Interrupted`] from the engine
    pub fn mutate(
        &mut self,
        id: &UserId,
        expected: Revision,
        patch: &Patch,
    ) -> Result<Revision, StoreError> {
        const OP: &str = "mutate";
        if patch.is_empty() {
            return Err(StoreError::EmptyPatch { id: *id });
        }
        let storage = |e| StoreError::storage(OP, Some(id), e);
        let _deadline = self.arm_deadline();

        let tx = begin(&self.conn, TransactionBehavior::Immediate).map_err(storage)?;

        // No stored row can be above MAX_REVISION, so such an `expected` can
        // only fail the compare.
        let current = if expected > MAX_REVISION {
            None
        } else {
            snapshot::get_if_at(&tx, id, expected).map_err(storage)?
        };
        let Some(current) = current else {
            return Err(Self::diagnose_failed_compare(&tx, id, expected)?);
        };
        if expected == MAX_REVISION {
            warn!(user_id = %id, revision = expected, "revision counter exhausted");
            return Err(StoreError::ConcurrencyConflict {
                id: *id,
                expected,
                actual: expected,
            });
        }
        let next = expected + 1;

        let record = DeltaRecord {
            user_id: *id,
            revision: next,
            pre_image: Patch::capture(&current, patch.fields()),
        };
        let now = now_us();

        let affected =
            snapshot::compare_and_set(&tx, id, expected, next, patch, now).map_err(storage)?;
        if affected != 1 {
            return Err(Self::diagnose_failed_compare(&tx, id, expected)?);
        }
        delta_log::append(&tx, &record, now).map_err(storage)?;
        tx.commit().map_err(storage)?;

        info!(
            user_id = %id,
            revision = next,
            fields = ?patch.fields().map(|f| f.as_str()).collect::<Vec<_>>(),
            "mutated user"
        );
        Ok(next)
    }

    /// Change the display name.
    ///
    /// # Errors
    ///
    /// Same as [`UserStore::mutate`].
    pub fn rename(&mut self, id: &UserId, expected: Revision, name: Name) -> Result<Revision, StoreError> {
        self.mutate(id, expected, &Patch::new().name(name))
    }

    /// Change the date of birth.
    ///
    /// # Errors
    ///
    /// Same as [`UserStore::mutate`].
    pub fn set_dob(
        &mut self,
        id: &UserId,
        expected: Revision,
        dob: NaiveDate,
    ) -> Result<Revision, StoreError> {
        self.mutate(id, expected, &Patch::new().dob(dob))
    }

    /// Change the role.
    ///
    /// # Errors
    ///
    /// Same as [`UserStore::mutate`].
    pub fn set_role(&mut self, id: &UserId, expected: Revision, role: Role) -> Result<Revision, StoreError> {
        self.mutate(id, expected, &Patch::new().role(role))
    }

    /// The user as it was at `target`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if `id` has no snapshot
    /// - [`StoreError::RevisionNotFound`] if `target` is above the latest revision
    /// - [`StoreError::ReconstructionGap`] if the delta log is missing records
    pub fn get_at(&self, id: &UserId, target: Revision) -> Result<User, StoreError> {
        const OP: &str = "get_at";
        let _deadline = self.arm_deadline();
        let tx = self.read_tx(OP, id)?;

        let (current, latest) = Self::current_at_or_above(&tx, OP, id, target)?;
        if target == latest {
            return Ok(current);
        }

        let rewind = delta_log::fold_desc(
            &tx,
            id,
            target,
            Rewind::new(current, latest, target),
            |acc, record| acc.step(&record),
        )?;
        let user = rewind.finish().inspect_err(log_gap)?;

        debug!(user_id = %id, target, latest, "reconstructed user");
        Ok(user)
    }

    /// Every state from the latest revision back to `from`, newest first.
    ///
    /// # Errors
    ///
    /// Same as [`UserStore::get_at`].
    pub fn history(&self, id: &UserId, from: Revision) -> Result<Vec<HistoryEntry>, StoreError> {
        const OP: &str = "history";
        let _deadline = self.arm_deadline();
        let tx = self.read_tx(OP, id)?;

        let (current, latest) = Self::current_at_or_above(&tx, OP, id, from)?;
        let builder = delta_log::fold_desc(
            &tx,
            id,
            from,
            HistoryBuilder::new(current, latest, from),
            |acc, record| acc.step(&record),
        )?;
        let entries = builder.finish().inspect_err(log_gap)?;

        debug!(user_id = %id, from, latest, entries = entries.len(), "reconstructed history");
        Ok(entries)
    }

    /// Snapshot of `id` in the read transaction, rejecting targets above it.
    fn current_at_or_above(
        tx: &Transaction<'_>,
        op: &'static str,
        id: &UserId,
        target: Revision,
    ) -> Result<(User, Revision), StoreError> {
        let found = snapshot::get(tx, id).map_err(|e| StoreError::storage(op, Some(id), e))?;
        let (current, latest) = found.ok_or(StoreError::NotFound { id: *id })?;
        if target > latest {
            return Err(StoreError::RevisionNotFound {
                id: *id,
                revision: target,
                latest,
            });
        }
        Ok((current, latest))
    }

    /// Deferred transaction so the snapshot row and the delta scan come from
    /// one consistent view.
    fn read_tx(&self, op: &'static str, id: &UserId) -> Result<Transaction<'_>, StoreError> {
        begin(&self.conn, TransactionBehavior::Deferred)
            .map_err(|e| StoreError::storage(op, Some(id), e))
    }

    /// Explain a compare that matched no row: missing identity or stale revision.
    fn diagnose_failed_compare(
        tx: &Transaction<'_>,
        id: &UserId,
        expected: Revision,
    ) -> Result<StoreError, StoreError> {
        let actual = snapshot::revision_of(tx, id)
            .map_err(|e| StoreError::storage("mutate", Some(id), e))?;
        Ok(match actual {
            None => StoreError::NotFound { id: *id },
            Some(actual) => {
                warn!(user_id = %id, expected, actual, "rejected stale mutation");
                StoreError::ConcurrencyConflict {
                    id: *id,
                    expected,
                    actual,
                }
            }
        })
    }

    fn arm_deadline(&self) -> DeadlineGuard<'_> {
        DeadlineGuard::arm(&self.conn, self.op_timeout)
    }
}

/// Interrupts SQLite once the deadline passes; disarms on drop.
struct DeadlineGuard<'conn> {
    conn: Option<&'conn Connection>,
}

impl<'conn> DeadlineGuard<'conn> {
    fn arm(conn: &'conn Connection, timeout: Option<Duration>) -> Self {
        let Some(timeout) = timeout else {
            return Self { conn: None };
        };
        let deadline = Instant::now() + timeout;
        conn.progress_handler(
            DEADLINE_CHECK_INTERVAL,
            Some(move || Instant::now() >= deadline),
        );
        Self { conn: Some(conn) }
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn {
            conn.progress_handler(0, None::<fn() -> bool>);
        }
    }
}

/// Start a transaction. A BEGIN that fails after opening one (an interrupt
/// can land once the statement has run) leaves nothing open behind it.
fn begin(conn: &Connection, behavior: TransactionBehavior) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, behavior).inspect_err(|_| {
        if conn.is_autocommit() {
            return;
        }
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "rollback after failed begin");
        }
    })
}

fn log_gap(err: &StoreError) {
    if let StoreError::ReconstructionGap {
        id,
        expected,
        found,
    } = err
    {
        warn!(user_id = %id, expected, ?found, "delta log gap during reconstruction");
    }
}

fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user::parse_date;

    fn name(raw: &str) -> Name {
        Name::parse(raw).expect("name")
    }

    fn date(raw: &str) -> NaiveDate {
        parse_date(raw).expect("date")
    }

    fn store_with_ada() -> (UserStore, UserId) {
        let mut store = UserStore::open_in_memory().expect("open store");
        let id = store
            .create(name("Ada"), date("1815-12-10"), Role::Guest)
            .expect("create");
        (store, id)
    }

    fn delta_count(store: &UserStore, id: &UserId) -> u64 {
        delta_log::count(store.connection(), id).expect("count deltas")
    }

    #[test]
    fn create_starts_at_base_revision_without_delta() {
        let (store, id) = store_with_ada();
        let (user, revision) = store.get(&id).expect("get");
        assert_eq!(revision, BASE_REVISION);
        assert_eq!(user.name.as_str(), "Ada");
        assert_eq!(user.role, Role::Guest);
        assert_eq!(delta_count(&store, &id), 0);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = UserStore::open_in_memory().expect("open store");
        let err = store.get(&UserId::new()).expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn mutate_advances_revision_and_records_pre_image() {
        let (mut store, id) = store_with_ada();
        let next = store.rename(&id, 0, name("Alan")).expect("rename");
        assert_eq!(next, 1);

        let records = delta_log::scan(store.connection(), &id, 0).expect("scan");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].revision, 1);
        assert_eq!(records[0].pre_image, Patch::new().name(name("Ada")));
    }

    #[test]
    fn stale_mutation_conflicts_and_changes_nothing() {
        let (mut store, id) = store_with_ada();
        store.rename(&id, 0, name("Alan")).expect("rename");

        let err = store.set_role(&id, 0, Role::Admin).expect_err("stale");
        assert!(matches!(
            err,
            StoreError::ConcurrencyConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert!(err.is_retryable());

        let (user, revision) = store.get(&id).expect("get");
        assert_eq!(revision, 1);
        assert_eq!(user.role, Role::Guest);
        assert_eq!(delta_count(&store, &id), 1);
    }

    #[test]
    fn future_expected_revision_conflicts() {
        let (mut store, id) = store_with_ada();
        let err = store.rename(&id, 2, name("Alan")).expect_err("ahead");
        assert!(matches!(err, StoreError::ConcurrencyConflict { expected: 2, actual: 0, .. }));
    }

    #[test]
    fn mutate_unknown_user_is_not_found() {
        let mut store = UserStore::open_in_memory().expect("open store");
        let err = store
            .set_role(&UserId::new(), 0, Role::Admin)
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn empty_patch_is_rejected_before_storage() {
        let (mut store, id) = store_with_ada();
        let err = store.mutate(&id, 0, &Patch::new()).expect_err("empty");
        assert!(matches!(err, StoreError::EmptyPatch { .. }));
        assert_eq!(store.get(&id).expect("get").1, 0);
    }

    #[test]
    fn multi_field_patch_is_one_revision() {
        let (mut store, id) = store_with_ada();
        let patch = Patch::new()
            .name(name("Grace"))
            .dob(date("1906-12-09"))
            .role(Role::Admin);
        assert_eq!(store.mutate(&id, 0, &patch).expect("mutate"), 1);

        let before = store.get_at(&id, 0).expect("get_at");
        assert_eq!(before.name.as_str(), "Ada");
        assert_eq!(before.dob, date("1815-12-10"));
        assert_eq!(before.role, Role::Guest);
    }

    #[test]
    fn get_at_latest_equals_get() {
        let (mut store, id) = store_with_ada();
        store.set_role(&id, 0, Role::Support).expect("set role");
        let (current, latest) = store.get(&id).expect("get");
        assert_eq!(store.get_at(&id, latest).expect("get_at"), current);
    }

    #[test]
    fn get_at_future_revision_is_not_found() {
        let (store, id) = store_with_ada();
        let err = store.get_at(&id, 1).expect_err("future");
        assert!(matches!(
            err,
            StoreError::RevisionNotFound {
                revision: 1,
                latest: 0,
                ..
            }
        ));
        assert!(store.history(&id, 1).is_err());
    }

    #[test]
    fn history_length_matches_revision_span() {
        let (mut store, id) = store_with_ada();
        store.rename(&id, 0, name("Alan")).expect("rename");
        store.set_dob(&id, 1, date("1912-06-23")).expect("set dob");

        assert_eq!(store.history(&id, 0).expect("history").len(), 3);
        assert_eq!(store.history(&id, 1).expect("history").len(), 2);
        assert_eq!(store.history(&id, 2).expect("history").len(), 1);
    }

    #[test]
    fn expired_deadline_interrupts_long_reconstruction() {
        let (mut store, id) = store_with_ada();
        let roles = [Role::Support, Role::Admin, Role::Guest];
        for revision in 0..600 {
            store
                .set_role(&id, revision, roles[revision as usize % 3])
                .expect("set role");
        }

        store.set_op_timeout(Some(Duration::ZERO));
        let err = store.get_at(&id, 0).expect_err("deadline");
        assert!(matches!(err, StoreError::Interrupted { .. }), "{err:?}");
        assert!(err.is_retryable());

        store.set_op_timeout(None);
        assert_eq!(store.get_at(&id, 0).expect("get_at").role, Role::Guest);
        assert_eq!(store.get(&id).expect("get").1, 600);
    }

    #[test]
    fn expected_beyond_storable_range_is_a_failed_compare() {
        let (mut store, id) = store_with_ada();
        let err = store.rename(&id, u64::MAX, name("Alan")).expect_err("unstorable");
        assert!(
            matches!(
                err,
                StoreError::ConcurrencyConflict {
                    expected: u64::MAX,
                    actual: 0,
                    ..
                }
            ),
            "{err:?}"
        );
        assert!(err.is_retryable());

        let err = store
            .rename(&UserId::new(), MAX_REVISION + 1, name("Alan"))
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }), "{err:?}");

        assert_eq!(store.get(&id).expect("get"), (store.get_at(&id, 0).expect("rev0"), 0));
        assert_eq!(delta_count(&store, &id), 0);
    }

    #[test]
    fn exhausted_revision_counter_conflicts() {
        let (mut store, id) = store_with_ada();
        store
            .connection()
            .execute_batch("DROP TRIGGER users_revision_advances_by_one")
            .expect("drop guard");
        store
            .connection()
            .execute(
                "UPDATE users SET revision = ?1 WHERE id = ?2",
                rusqlite::params![MAX_REVISION, id],
            )
            .expect("jump revision");

        let err = store
            .set_role(&id, MAX_REVISION, Role::Admin)
            .expect_err("no revision left");
        assert!(
            matches!(
                err,
                StoreError::ConcurrencyConflict { expected, actual, .. }
                    if expected == MAX_REVISION && actual == MAX_REVISION
            ),
            "{err:?}"
        );

        let (user, revision) = store.get(&id).expect("get");
        assert_eq!(revision, MAX_REVISION);
        assert_eq!(user.role, Role::Guest);
        assert_eq!(delta_count(&store, &id), 0);
    }

    /// Interrupt the write at every progress check in turn. Each attempt
    /// either commits the snapshot and its delta together or leaves both
    /// untouched, and the store keeps accepting writes afterwards.
    #[test]
    fn interrupted_mutation_persists_nothing_partial() {
        let mut rolled_back = 0;
        for fire_at in 1..100_000_u32 {
            let (mut store, id) = store_with_ada();
            let mut checks = 0_u32;
            store.connection().progress_handler(
                1,
                Some(move || {
                    checks += 1;
                    checks == fire_at
                }),
            );
            let result = store.rename(&id, 0, name("Alan"));
            store.connection().progress_handler(0, None::<fn() -> bool>);

            let (user, revision) = store.get(&id).expect("get");
            match result {
                Ok(next) => {
                    assert_eq!((next, revision, delta_count(&store, &id)), (1, 1, 1));
                    assert!(rolled_back > 0, "no attempt was interrupted");
                    return;
                }
                Err(StoreError::Interrupted { op: "mutate" }) if revision == 0 => {
                    assert_eq!(user.name.as_str(), "Ada");
                    assert_eq!(delta_count(&store, &id), 0);
                    assert_eq!(store.rename(&id, 0, name("Alan")).expect("retry"), 1);
                    rolled_back += 1;
                }
                // The commit itself went through before the check fired.
                Err(StoreError::Interrupted { op: "mutate" }) => {
                    assert_eq!(revision, 1);
                    assert_eq!(user.name.as_str(), "Alan");
                    assert_eq!(delta_count(&store, &id), 1);
                }
                Err(other) => panic!("check {fire_at}: unexpected {other:?}"),
            }
        }
        panic!("mutation never completed");
    }

    #[test]
    fn interrupt_handle_cancels_reconstruction_from_another_thread() {
        use std::sync::{Arc, Barrier};

        let (mut store, id) = store_with_ada();
        let roles = [Role::Support, Role::Admin, Role::Guest];
        for revision in 0..600 {
            store
                .set_role(&id, revision, roles[revision as usize % 3])
                .expect("set role");
        }

        // The scan parks in the progress handler until the other thread has
        // fired the interrupt.
        let parked = Arc::new(Barrier::new(2));
        let fired = Arc::new(Barrier::new(2));
        let handle = store.interrupt_handle();
        let canceller = {
            let (parked, fired) = (Arc::clone(&parked), Arc::clone(&fired));
            std::thread::spawn(move || {
                parked.wait();
                handle.interrupt();
                fired.wait();
            })
        };
        let mut waiting = true;
        store.connection().progress_handler(
            DEADLINE_CHECK_INTERVAL,
            Some(move || {
                if waiting {
                    waiting = false;
                    parked.wait();
                    fired.wait();
                }
                false
            }),
        );

        let result = store.get_at(&id, 0);
        store.connection().progress_handler(0, None::<fn() -> bool>);
        canceller.join().expect("canceller thread");

        let err = result.expect_err("cancelled");
        assert!(matches!(err, StoreError::Interrupted { .. }), "{err:?}");
        assert_eq!(store.get_at(&id, 0).expect("get_at").role, Role::Guest);
    }
}
