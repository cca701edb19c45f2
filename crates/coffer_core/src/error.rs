//! Error types for the version ledger.

use crate::types::{EntityPath, Version};
use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
///
/// Every mutation validates before applying: when one of these is returned,
/// the ledger is unchanged.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No entity is tracked at the given path.
    #[error("no entity at {path}")]
    NotFound {
        /// The path that did not resolve.
        path: EntityPath,
    },

    /// A caller-supplied expected version is stale.
    #[error("version mismatch: expected {expected}, current is {actual}")]
    VersionMismatch {
        /// The version the caller expected.
        expected: Version,
        /// The version actually current.
        actual: Version,
    },

    /// Archival requires a synced version that does not exist or does not
    /// match.
    #[error("not synced: {path} has no matching synced version")]
    NotSynced {
        /// The entity whose synced branch was consulted.
        path: EntityPath,
    },

    /// An operation would move a branch backwards.
    #[error("version regression on {path}: {attempted} is not after {current}")]
    VersionRegression {
        /// The entity involved.
        path: EntityPath,
        /// The version the branch already holds.
        current: Version,
        /// The earlier version the caller tried to record.
        attempted: Version,
    },
}

impl LedgerError {
    /// Creates a not-found error.
    pub fn not_found(path: &EntityPath) -> Self {
        Self::NotFound { path: path.clone() }
    }

    /// Creates a not-synced error.
    pub fn not_synced(path: &EntityPath) -> Self {
        Self::NotSynced { path: path.clone() }
    }
}
