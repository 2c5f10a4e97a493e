use std::fmt;

use crate::model::field::FieldError;
use crate::model::user::{Revision, UserId};

/// Machine-readable error codes for callers that branch on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UserNotFound,
    RevisionNotFound,
    ConcurrencyConflict,
    EmptyPatch,
    InvalidFieldValue,
    ReconstructionGap,
    CorruptDeltaRecord,
    StorageFailure,
    Interrupted,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UserNotFound => "E2001",
            Self::RevisionNotFound => "E2002",
            Self::ConcurrencyConflict => "E2003",
            Self::EmptyPatch => "E2004",
            Self::InvalidFieldValue => "E2005",
            Self::ReconstructionGap => "E3001",
            Self::CorruptDeltaRecord => "E3002",
            Self::StorageFailure => "E5001",
            Self::Interrupted => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UserNotFound => "User not found",
            Self::RevisionNotFound => "Revision not found",
            Self::ConcurrencyConflict => "Revision conflict",
            Self::EmptyPatch => "Nothing to change",
            Self::InvalidFieldValue => "Invalid field value",
            Self::ReconstructionGap => "Delta log has a gap",
            Self::CorruptDeltaRecord => "Corrupt delta record",
            Self::StorageFailure => "Storage failure",
            Self::Interrupted => "Operation interrupted",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::UserNotFound => None,
            Self::RevisionNotFound => Some("Use `pal show <id>` to see the latest revision."),
            Self::ConcurrencyConflict => {
                Some("Re-read the user with `pal show <id>` and resubmit with the new revision.")
            }
            Self::EmptyPatch => Some("Supply at least one field to change."),
            Self::InvalidFieldValue => {
                Some("Names are 1-30 characters, dates are YYYY-MM-DD, roles are guest/support/admin.")
            }
            Self::ReconstructionGap | Self::CorruptDeltaRecord => {
                Some("The delta log was modified outside the store; restore it from backup.")
            }
            Self::StorageFailure => Some("Check disk space, permissions and the database path."),
            Self::Interrupted => Some("Retry with a longer deadline."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures surfaced by [`crate::store::UserStore`].
///
/// Engine errors only appear as the `source()` of [`StoreError::StorageFailure`];
/// every other variant is part of the store's own vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No snapshot exists for the identity.
    #[error("user {id} not found")]
    NotFound { id: UserId },

    /// A point-in-time read targeted a revision the user never reached.
    #[error("user {id} has no revision {revision} (latest is {latest})")]
    RevisionNotFound {
        id: UserId,
        revision: Revision,
        latest: Revision,
    },

    /// The expected-revision precondition of a mutation failed.
    #[error("revision conflict on user {id}: expected {expected}, current is {actual}")]
    ConcurrencyConflict {
        id: UserId,
        expected: Revision,
        actual: Revision,
    },

    /// A mutation carried no field updates.
    #[error("nothing to change for user {id}")]
    EmptyPatch { id: UserId },

    /// A field value failed validation.
    #[error(transparent)]
    InvalidField(#[from] FieldError),

    /// The backward scan did not visit every revision between latest and target.
    #[error(
        "delta log for user {id} has a gap: expected revision {expected}, found {}",
        .found.map_or_else(|| "end of log".to_string(), |r| r.to_string())
    )]
    ReconstructionGap {
        id: UserId,
        expected: Revision,
        found: Option<Revision>,
    },

    /// A persisted delta record cannot be decoded into a pre-image.
    #[error("corrupt delta record for user {id} at revision {revision}: {detail}")]
    CorruptDelta {
        id: UserId,
        revision: Revision,
        detail: String,
    },

    /// The operation hit its deadline or was cancelled through an interrupt handle.
    #[error("{op} interrupted before completion")]
    Interrupted { op: &'static str },

    /// The storage engine failed for reasons unrelated to the above.
    #[error(
        "storage failure during {op}{}",
        .id.as_ref().map_or_else(String::new, |id| format!(" on user {id}"))
    )]
    StorageFailure {
        op: &'static str,
        id: Option<UserId>,
        #[source]
        source: EngineError,
    },
}

/// Engine error behind a [`StoreError::StorageFailure`].
///
/// Callers see its message and `source()` chain, not the engine's error type.
#[derive(Debug)]
pub struct EngineError(rusqlite::Error);

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl StoreError {
    /// Wrap an engine error with the operation and identity it happened in.
    ///
    /// Interrupts (deadline or explicit cancellation) become
    /// [`StoreError::Interrupted`] rather than a storage failure.
    #[must_use]
    pub fn storage(op: &'static str, id: Option<&UserId>, source: rusqlite::Error) -> Self {
        let interrupted = matches!(
            &source,
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::OperationInterrupted
        );
        if interrupted {
            return Self::Interrupted { op };
        }
        Self::StorageFailure {
            op,
            id: id.copied(),
            source: EngineError(source),
        }
    }

    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::UserNotFound,
            Self::RevisionNotFound { .. } => ErrorCode::RevisionNotFound,
            Self::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            Self::EmptyPatch { .. } => ErrorCode::EmptyPatch,
            Self::InvalidField(_) => ErrorCode::InvalidFieldValue,
            Self::ReconstructionGap { .. } => ErrorCode::ReconstructionGap,
            Self::CorruptDelta { .. } => ErrorCode::CorruptDeltaRecord,
            Self::Interrupted { .. } => ErrorCode::Interrupted,
            Self::StorageFailure { .. } => ErrorCode::StorageFailure,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// True for failures where re-reading and resubmitting can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::Interrupted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, StoreError};
    use crate::model::user::UserId;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::UserNotFound,
            ErrorCode::RevisionNotFound,
            ErrorCode::ConcurrencyConflict,
            ErrorCode::EmptyPatch,
            ErrorCode::InvalidFieldValue,
            ErrorCode::ReconstructionGap,
            ErrorCode::CorruptDeltaRecord,
            ErrorCode::StorageFailure,
            ErrorCode::Interrupted,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::ConcurrencyConflict.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn interrupted_sqlite_errors_are_not_storage_failures() {
        let interrupted = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        let err = StoreError::storage("get", None, interrupted);
        assert!(matches!(err, StoreError::Interrupted { op: "get" }));
        assert!(err.is_retryable());
    }

    #[test]
    fn storage_failure_names_operation_and_user() {
        let id = UserId::new();
        let err = StoreError::storage("create", Some(&id), rusqlite::Error::InvalidQuery);
        assert_eq!(err.code(), ErrorCode::StorageFailure);
        let rendered = err.to_string();
        assert!(rendered.contains("create"), "{rendered}");
        assert!(rendered.contains(&id.to_string()), "{rendered}");
        let engine = std::error::Error::source(&err).expect("engine error");
        assert_eq!(engine.to_string(), rusqlite::Error::InvalidQuery.to_string());
    }

    #[test]
    fn gap_message_mentions_end_of_log() {
        let err = StoreError::ReconstructionGap {
            id: UserId::new(),
            expected: 2,
            found: None,
        };
        assert!(err.to_string().contains("end of log"));
        assert_eq!(err.code(), ErrorCode::ReconstructionGap);
        assert!(!err.is_retryable());
    }
}
