//! Error types for the sync engine.

use coffer_core::{EntityKind, EntityPath, LedgerError, ListingError};
use coffer_remote::RemoteError;
use coffer_store::StoreError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Errors surface synchronously to the triggering call and no operation
/// partially applies a ledger mutation. `Conflict` and `VersionMismatch`
/// are caller-recoverable; cipher verification failures and invariant
/// violations are fatal to that operation only, never to the process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No entity is tracked at the given path.
    #[error("no entity at {path}")]
    NotFound {
        /// The path that did not resolve.
        path: EntityPath,
    },

    /// A caller-supplied version is stale or unacceptable.
    #[error("version mismatch: {message}")]
    VersionMismatch {
        /// What was expected and what was seen.
        message: String,
    },

    /// Both branches diverged; the operation needs explicit disambiguation.
    #[error("conflict on {path}: both branches diverged from the last synced version")]
    Conflict {
        /// The conflicted entity.
        path: EntityPath,
    },

    /// Archival requires a synced version that does not exist.
    #[error("not synced: {path}")]
    NotSynced {
        /// The entity whose synced branch was consulted.
        path: EntityPath,
    },

    /// A folder upload is blocked by a child that has never been uploaded.
    #[error("folder upload blocked: child {child} has never been uploaded")]
    ChildNeverUploaded {
        /// Name of the unpublished child.
        child: String,
    },

    /// A file operation hit a folder or vice versa.
    #[error("{path} is not a {expected:?}")]
    WrongKind {
        /// The entity involved.
        path: EntityPath,
        /// The kind the operation requires.
        expected: EntityKind,
    },

    /// A ledger invariant was violated.
    #[error("ledger invariant violated: {0}")]
    LedgerInvariant(String),

    /// Local object store error (including cipher verification failures).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Remote client error (including connectivity).
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Folder listing codec error.
    #[error(transparent)]
    Listing(#[from] ListingError),

    /// A delta patch did not apply to its base.
    #[error("delta patch does not apply: {message}")]
    DeltaMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A background transfer task failed; the original error is attached.
    #[error("transfer task failed: {source}")]
    TaskFailed {
        /// The failure observed by the task.
        source: Arc<SyncError>,
    },
}

impl From<LedgerError> for SyncError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { path } => SyncError::NotFound { path },
            LedgerError::VersionMismatch { expected, actual } => SyncError::VersionMismatch {
                message: format!("expected {expected}, current is {actual}"),
            },
            LedgerError::NotSynced { path } => SyncError::NotSynced { path },
            LedgerError::VersionRegression { path, current, attempted } => {
                SyncError::LedgerInvariant(format!(
                    "{path}: {attempted} is not after {current}"
                ))
            }
        }
    }
}

impl SyncError {
    /// Creates a version-mismatch error.
    pub fn version_mismatch(message: impl Into<String>) -> Self {
        Self::VersionMismatch { message: message.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(path: &EntityPath) -> Self {
        Self::Conflict { path: path.clone() }
    }

    /// Creates a not-found error.
    pub fn not_found(path: &EntityPath) -> Self {
        Self::NotFound { path: path.clone() }
    }

    /// Creates a not-synced error.
    pub fn not_synced(path: &EntityPath) -> Self {
        Self::NotSynced { path: path.clone() }
    }

    /// Returns true if retrying with corrected parameters can succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::VersionMismatch { .. }
                | SyncError::Conflict { .. }
                | SyncError::NotSynced { .. }
        )
    }

    /// Returns true if the error is (or wraps) a connectivity failure.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_connectivity(),
            SyncError::TaskFailed { source } => source.is_connectivity(),
            _ => false,
        }
    }

    /// Returns true if the error is (or wraps) a cipher verification
    /// failure.
    #[must_use]
    pub fn is_cipher_verification(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_cipher_verification(),
            SyncError::TaskFailed { source } => source.is_cipher_verification(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors() {
        let path = EntityPath::new("/a");
        assert!(SyncError::conflict(&path).is_recoverable());
        assert!(SyncError::version_mismatch("stale").is_recoverable());
        assert!(!SyncError::not_found(&path).is_recoverable());
    }

    #[test]
    fn connectivity_threads_through_task_failures() {
        let inner = SyncError::Remote(RemoteError::connectivity("down"));
        assert!(inner.is_connectivity());

        let wrapped = SyncError::TaskFailed { source: Arc::new(inner) };
        assert!(wrapped.is_connectivity());
        assert!(!wrapped.is_cipher_verification());
    }

    #[test]
    fn ledger_errors_flatten_into_taxonomy() {
        let err: SyncError = LedgerError::not_found(&EntityPath::new("/x")).into();
        assert!(matches!(err, SyncError::NotFound { .. }));

        let err: SyncError = LedgerError::not_synced(&EntityPath::new("/x")).into();
        assert!(matches!(err, SyncError::NotSynced { .. }));
    }
}
