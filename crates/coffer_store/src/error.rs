//! Error types for the object store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No object exists for the given (entity, version) key.
    #[error("unknown object: {key}")]
    UnknownObject {
        /// Display form of the object key.
        key: String,
    },

    /// An object already exists with a different layout.
    #[error("object {key} already exists with a different layout")]
    LayoutMismatch {
        /// Display form of the object key.
        key: String,
    },

    /// A chunk index is outside the object's layout.
    #[error("chunk {index} out of range: object has {count} chunks")]
    ChunkOutOfRange {
        /// The offending index.
        index: u32,
        /// The object's chunk count.
        count: u32,
    },

    /// A chunk payload does not match its expected length.
    #[error("chunk {index} length mismatch: expected {expected}, got {actual}")]
    ChunkSizeMismatch {
        /// The chunk index.
        index: u32,
        /// The length the layout requires.
        expected: u64,
        /// The length received.
        actual: u64,
    },

    /// A read touched a chunk that is not on disk yet.
    #[error("chunk {index} not on disk")]
    MissingChunk {
        /// The absent chunk index.
        index: u32,
    },

    /// A whole-object read on an incomplete object.
    #[error("object {key} is incomplete")]
    Incomplete {
        /// Display form of the object key.
        key: String,
    },

    /// A read past the end of the object.
    #[error("read past end: offset {offset} + len {len} > size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Object size.
        size: u64,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    Encryption {
        /// Description of the failure.
        message: String,
    },

    /// Decryption authentication failed.
    ///
    /// Treated as corruption or tampering; never silently accepted and
    /// never retried.
    #[error("cipher verification failed: {message}")]
    CipherVerification {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key material.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

impl StoreError {
    /// Creates an unknown-object error.
    pub fn unknown_object(key: impl ToString) -> Self {
        Self::UnknownObject { key: key.to_string() }
    }

    /// Creates an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption { message: message.into() }
    }

    /// Creates a cipher-verification error.
    pub fn cipher_verification(message: impl Into<String>) -> Self {
        Self::CipherVerification { message: message.into() }
    }

    /// Returns true if the error indicates corruption or tampering.
    #[must_use]
    pub fn is_cipher_verification(&self) -> bool {
        matches!(self, StoreError::CipherVerification { .. })
    }
}
