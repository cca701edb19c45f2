//! Error types for the remote client.

use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur talking to the remote store.
///
/// Timeouts and retry policy belong to the client implementation; the sync
/// engine never retries on its own and leaves the ledger unchanged on any
/// of these.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The network is unreachable or the client is offline.
    #[error("connectivity error: {message}")]
    Connectivity {
        /// Description of the failure.
        message: String,
    },

    /// The remote does not know the entity.
    #[error("remote has no entity {entity}")]
    UnknownEntity {
        /// Display form of the entity id.
        entity: String,
    },

    /// The remote does not hold the requested version.
    #[error("remote has no version {version} of entity {entity}")]
    UnknownVersion {
        /// Display form of the entity id.
        entity: String,
        /// Display form of the version.
        version: String,
    },

    /// A version with that number is already committed remotely.
    #[error("remote already holds version {version} of entity {entity}")]
    VersionExists {
        /// Display form of the entity id.
        entity: String,
        /// Display form of the version.
        version: String,
    },

    /// The remote answered with something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Creates a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity { message: message.into() }
    }

    /// Returns true if the error is a connectivity failure.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Connectivity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_predicate() {
        assert!(RemoteError::connectivity("offline").is_connectivity());
        assert!(!RemoteError::Protocol("bad frame".into()).is_connectivity());
    }
}
