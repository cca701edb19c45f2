//! # Coffer Store
//!
//! Local encrypted object store for the Coffer sync engine.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait: chunked persistence of entity version
//!   content keyed by (entity, version), with per-version on-disk
//!   completeness
//! - [`MemoryObjectStore`] for tests and caches
//! - [`EncryptedObjectStore`], an encrypting wrapper over any store
//! - The [`Cryptor`] trait with an AES-256-GCM implementation
//!
//! Version content is immutable: chunks are written once and whole versions
//! are only ever dropped when their entity is deleted. Resumable transfers
//! lean on this: a partially fetched version keeps its chunks across
//! process restarts of the transfer, and completeness is always derivable.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod encrypted;
mod error;
mod memory;
mod object;

pub use crypto::{
    content_hash, AesGcmCryptor, Cryptor, EncryptionKey, CIPHER_OVERHEAD, KEY_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
pub use encrypted::EncryptedObjectStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryObjectStore;
pub use object::{put_object, ObjectId, ObjectLayout, ObjectStore, OnDiskState, Realm};
