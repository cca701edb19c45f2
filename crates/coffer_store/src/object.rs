//! Object store trait and chunk layout.
//!
//! An object store persists the content of entity versions as fixed-size
//! chunks keyed by (entity, version). Stores are **append-only within a
//! version**: a chunk, once written, never changes. Versions are immutable
//! and new content always gets a new version number. Whole versions may be
//! dropped when their entity is deleted.
//!
//! # Invariants
//!
//! - A chunk written at index `i` is exactly the bytes later read at `i`
//! - [`ObjectStore::state`] reports `Complete` exactly when every chunk of
//!   the layout is present
//! - Stores are `Send + Sync` for concurrent access

use crate::error::StoreResult;
use bytes::Bytes;
use coffer_core::{EntityId, Version};
use std::fmt;
use std::ops::Range;

/// Which keyspace a stored version lives in.
///
/// Replicas that diverge can mint the same version number for different
/// content (each numbers its own branch), so locally-authored versions and
/// cached remote versions must not share a keyspace. Numbers at or below
/// the synced watermark refer to the common lineage and may be served from
/// either realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    /// Locally-authored (or adopted) version content.
    Local,
    /// Content fetched from the remote, not yet adopted.
    Cache,
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Realm::Local => write!(f, "local"),
            Realm::Cache => write!(f, "cache"),
        }
    }
}

/// Key of one stored version: (entity, version, realm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    /// The entity the version belongs to.
    pub entity: EntityId,
    /// The version number.
    pub version: Version,
    /// The keyspace the content lives in.
    pub realm: Realm,
}

impl ObjectId {
    /// Creates an object key.
    #[must_use]
    pub const fn new(entity: EntityId, version: Version, realm: Realm) -> Self {
        Self { entity, version, realm }
    }

    /// Key of a locally-authored version.
    #[must_use]
    pub const fn local(entity: EntityId, version: Version) -> Self {
        Self::new(entity, version, Realm::Local)
    }

    /// Key of a cached remote version.
    #[must_use]
    pub const fn cache(entity: EntityId, version: Version) -> Self {
        Self::new(entity, version, Realm::Cache)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.entity, self.version, self.realm)
    }
}

/// How much of a version's content is persisted locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDiskState {
    /// Nothing persisted.
    Missing,
    /// Some chunks persisted.
    Partial,
    /// Every chunk persisted.
    Complete,
}

/// Chunk layout of one object: total length and uniform chunk size.
///
/// Every chunk has length `chunk_size` except the last, which holds the
/// remainder. A zero-length object has zero chunks and is complete on
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLayout {
    /// Total content length in bytes.
    pub total_len: u64,
    /// Uniform chunk size in bytes (except the last chunk).
    pub chunk_size: u32,
}

impl ObjectLayout {
    /// Creates a layout.
    #[must_use]
    pub const fn new(total_len: u64, chunk_size: u32) -> Self {
        Self { total_len, chunk_size }
    }

    /// Number of chunks in the layout.
    #[must_use]
    pub fn chunk_count(&self) -> u32 {
        if self.total_len == 0 {
            0
        } else {
            self.total_len.div_ceil(u64::from(self.chunk_size)) as u32
        }
    }

    /// Expected length of the chunk at `index`.
    #[must_use]
    pub fn chunk_len(&self, index: u32) -> u64 {
        let start = u64::from(index) * u64::from(self.chunk_size);
        (self.total_len - start).min(u64::from(self.chunk_size))
    }

    /// Byte offset of the chunk at `index`.
    #[must_use]
    pub fn chunk_offset(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.chunk_size)
    }

    /// The chunk indices covering `offset..offset + len`.
    #[must_use]
    pub fn chunk_span(&self, offset: u64, len: u64) -> Range<u32> {
        if len == 0 || self.total_len == 0 {
            return 0..0;
        }
        let first = (offset / u64::from(self.chunk_size)) as u32;
        let last = ((offset + len - 1) / u64::from(self.chunk_size)) as u32;
        first..last.saturating_add(1).min(self.chunk_count())
    }
}

/// Chunked persistence for entity version content.
///
/// # Implementors
///
/// - [`crate::MemoryObjectStore`] for tests and caches
/// - [`crate::EncryptedObjectStore`], an encrypting wrapper over any store
pub trait ObjectStore: Send + Sync {
    /// Registers an object and its layout.
    ///
    /// Idempotent for an identical layout; fails `LayoutMismatch` when the
    /// object exists with a different one.
    fn create(&self, id: ObjectId, layout: ObjectLayout) -> StoreResult<()>;

    /// Returns the layout of an object, if known.
    fn layout(&self, id: &ObjectId) -> Option<ObjectLayout>;

    /// Persists one chunk.
    ///
    /// The payload length must match the layout's expectation for `index`.
    /// Re-writing an already-present chunk with identical bytes is a no-op.
    fn put_chunk(&self, id: &ObjectId, index: u32, bytes: Bytes) -> StoreResult<()>;

    /// Returns one chunk, or `None` if not yet persisted.
    fn chunk(&self, id: &ObjectId, index: u32) -> StoreResult<Option<Bytes>>;

    /// Returns the indices of chunks not yet persisted, ascending.
    fn missing_chunks(&self, id: &ObjectId) -> StoreResult<Vec<u32>>;

    /// Reports how much of the object is persisted.
    fn state(&self, id: &ObjectId) -> OnDiskState;

    /// Reads `len` bytes at `offset`, failing on any missing chunk.
    fn read_range(&self, id: &ObjectId, offset: u64, len: u64) -> StoreResult<Vec<u8>>;

    /// Reads the whole object; fails `Incomplete` unless complete.
    fn read_all(&self, id: &ObjectId) -> StoreResult<Vec<u8>>;

    /// Re-keys an object to a new id (conflict re-label).
    fn rename(&self, from: &ObjectId, to: ObjectId) -> StoreResult<()>;

    /// Drops one version object, if present.
    ///
    /// Used when an adoption discards colliding local content; regular
    /// version content is immutable otherwise.
    fn remove(&self, id: &ObjectId);

    /// Drops every version belonging to an entity, across realms.
    fn remove_entity(&self, entity: &EntityId);
}

/// Convenience: stores a complete object in one call.
pub fn put_object(
    store: &dyn ObjectStore,
    id: ObjectId,
    chunk_size: u32,
    bytes: &[u8],
) -> StoreResult<()> {
    let layout = ObjectLayout::new(bytes.len() as u64, chunk_size);
    store.create(id, layout)?;
    for index in 0..layout.chunk_count() {
        let start = layout.chunk_offset(index) as usize;
        let end = start + layout.chunk_len(index) as usize;
        store.put_chunk(&id, index, Bytes::copy_from_slice(&bytes[start..end]))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_chunk_math() {
        let layout = ObjectLayout::new(10, 4);
        assert_eq!(layout.chunk_count(), 3);
        assert_eq!(layout.chunk_len(0), 4);
        assert_eq!(layout.chunk_len(2), 2);
        assert_eq!(layout.chunk_offset(2), 8);
        assert_eq!(layout.chunk_span(0, 10), 0..3);
        assert_eq!(layout.chunk_span(4, 1), 1..2);
        assert_eq!(layout.chunk_span(3, 2), 0..2);
        assert_eq!(layout.chunk_span(0, 0), 0..0);
    }

    #[test]
    fn exact_multiple_layout() {
        let layout = ObjectLayout::new(8, 4);
        assert_eq!(layout.chunk_count(), 2);
        assert_eq!(layout.chunk_len(1), 4);
    }

    #[test]
    fn empty_layout() {
        let layout = ObjectLayout::new(0, 4);
        assert_eq!(layout.chunk_count(), 0);
        assert_eq!(layout.chunk_span(0, 0), 0..0);
    }

    proptest::proptest! {
        // Chunk lengths always partition the total and spans always cover
        // the requested range.
        #[test]
        fn layout_partitions_content(total in 0u64..10_000, chunk_size in 1u32..512) {
            let layout = ObjectLayout::new(total, chunk_size);
            let sum: u64 = (0..layout.chunk_count()).map(|i| layout.chunk_len(i)).sum();
            proptest::prop_assert_eq!(sum, total);

            if total > 0 {
                let span = layout.chunk_span(0, total);
                proptest::prop_assert_eq!(span, 0..layout.chunk_count());
            }
        }
    }
}
