//! Backward reconstruction of earlier revisions.
//!
//! Starting from the current snapshot at revision `latest`, each delta record
//! (revision `r`) restores the values its fields held at `r - 1`. Folding the
//! records from `latest` down to `target + 1` therefore yields the state as of
//! `target`. The records must arrive in strictly descending order and must
//! cover every revision in that range; applying them in any other order would
//! let a newer pre-image overwrite an older one.
//!
//! The accumulators here own their state and never touch storage, so any
//! number of reconstructions can run side by side.

use serde::Serialize;

use crate::db::delta_log::DeltaRecord;
use crate::error::StoreError;
use crate::model::{Revision, User};

/// One reconstructed state in a history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub revision: Revision,
    pub user: User,
}

/// Accumulator for rewinding a snapshot to an earlier revision.
#[derive(Debug, Clone)]
pub struct Rewind {
    state: User,
    revision: Revision,
    target: Revision,
}

impl Rewind {
    /// Start from `current` at `latest`, heading for `target`.
    ///
    /// A `target` above `latest` is clamped to `latest`; callers reject such
    /// targets before rewinding.
    #[must_use]
    pub fn new(current: User, latest: Revision, target: Revision) -> Self {
        Self {
            state: current,
            revision: latest,
            target: target.min(latest),
        }
    }

    /// Revision the working copy currently represents.
    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    #[must_use]
    pub const fn state(&self) -> &User {
        &self.state
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.revision == self.target
    }

    /// Undo the change recorded in `record`.
    ///
    /// Records at or below the target are outside the rewind and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReconstructionGap`] when `record` is not the
    /// record for the working copy's current revision.
    pub fn step(mut self, record: &DeltaRecord) -> Result<Self, StoreError> {
        if record.revision <= self.target {
            return Ok(self);
        }
        if record.revision != self.revision {
            return Err(StoreError::ReconstructionGap {
                id: self.state.id,
                expected: self.revision,
                found: Some(record.revision),
            });
        }
        record.pre_image.apply_to(&mut self.state);
        self.revision -= 1;
        Ok(self)
    }

    /// The state as of the target revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReconstructionGap`] if the records ran out
    /// before the target was reached.
    pub fn finish(self) -> Result<User, StoreError> {
        if self.is_done() {
            Ok(self.state)
        } else {
            Err(StoreError::ReconstructionGap {
                id: self.state.id,
                expected: self.revision,
                found: None,
            })
        }
    }
}

/// Rewind `current` (at `latest`) to `target` using records in descending order.
///
/// # Errors
///
/// Returns [`StoreError::ReconstructionGap`] if the records are out of order
/// or do not cover `target + 1 ..= latest`.
pub fn rewind<'a>(
    current: User,
    latest: Revision,
    target: Revision,
    records: impl IntoIterator<Item = &'a DeltaRecord>,
) -> Result<User, StoreError> {
    records
        .into_iter()
        .try_fold(Rewind::new(current, latest, target), Rewind::step)?
        .finish()
}

/// Accumulator that keeps every intermediate state of a rewind.
#[derive(Debug, Clone)]
pub struct HistoryBuilder {
    rewind: Rewind,
    entries: Vec<HistoryEntry>,
}

impl HistoryBuilder {
    /// Start with the current snapshot as the newest entry.
    #[must_use]
    pub fn new(current: User, latest: Revision, from: Revision) -> Self {
        let entries = vec![HistoryEntry {
            revision: latest,
            user: current.clone(),
        }];
        Self {
            rewind: Rewind::new(current, latest, from),
            entries,
        }
    }

    /// Undo one change and record the resulting state.
    ///
    /// # Errors
    ///
    /// Same as [`Rewind::step`].
    pub fn step(mut self, record: &DeltaRecord) -> Result<Self, StoreError> {
        let before = self.rewind.revision();
        self.rewind = self.rewind.step(record)?;
        if self.rewind.revision() != before {
            self.entries.push(HistoryEntry {
                revision: self.rewind.revision(),
                user: self.rewind.state().clone(),
            });
        }
        Ok(self)
    }

    /// Entries from `latest` down to `from`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReconstructionGap`] if the history is incomplete.
    pub fn finish(self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.rewind.finish()?;
        Ok(self.entries)
    }
}

/// Every state from `latest` back to `from`, newest first.
///
/// # Errors
///
/// Returns [`StoreError::ReconstructionGap`] if the records are out of order
/// or do not cover `from + 1 ..= latest`.
pub fn history<'a>(
    current: User,
    latest: Revision,
    from: Revision,
    records: impl IntoIterator<Item = &'a DeltaRecord>,
) -> Result<Vec<HistoryEntry>, StoreError> {
    records
        .into_iter()
        .try_fold(HistoryBuilder::new(current, latest, from), HistoryBuilder::step)?
        .finish()
}
