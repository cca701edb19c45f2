//! Local version content and metadata.
//!
//! Thin layer over the shared object store: stores whole version contents
//! (local writes always land complete), keeps the per-version metadata the
//! diff engine consumes, and decodes folder listings. Version content is
//! immutable; a new write always produces a new version object.

use crate::error::SyncResult;
use bytes::Bytes;
use coffer_core::{EntityId, FolderListing};
use coffer_store::{ObjectId, ObjectLayout, ObjectStore, OnDiskState};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata of one stored version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredMeta {
    /// Content length in bytes (reconstructed, never the patch length).
    pub len: u64,
    /// Modification time, milliseconds since the epoch.
    pub mtime_ms: u64,
    /// Creation time, milliseconds since the epoch.
    pub ctime_ms: u64,
    /// Application attributes of the version.
    pub attrs: BTreeMap<String, String>,
}

/// Milliseconds since the epoch, for stamping local writes.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Local store: object content plus a metadata index.
pub struct LocalStore {
    objects: Arc<dyn ObjectStore>,
    meta: RwLock<HashMap<ObjectId, StoredMeta>>,
    chunk_size: u32,
}

impl LocalStore {
    /// Creates a local store over the given object store.
    pub fn new(objects: Arc<dyn ObjectStore>, chunk_size: u32) -> Self {
        Self { objects, meta: RwLock::new(HashMap::new()), chunk_size }
    }

    /// The configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The underlying object store.
    #[must_use]
    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Stores a complete version with its metadata.
    pub fn put_version(&self, id: ObjectId, bytes: &[u8], meta: StoredMeta) -> SyncResult<()> {
        coffer_store::put_object(self.objects.as_ref(), id, self.chunk_size, bytes)?;
        self.meta.write().insert(id, meta);
        Ok(())
    }

    /// Registers an object for incremental chunk arrival (downloads).
    pub fn begin_version(&self, id: ObjectId, total_len: u64) -> SyncResult<()> {
        self.objects
            .create(id, ObjectLayout::new(total_len, self.chunk_size))?;
        Ok(())
    }

    /// Persists one arriving chunk.
    pub fn put_chunk(&self, id: &ObjectId, index: u32, bytes: Bytes) -> SyncResult<()> {
        self.objects.put_chunk(id, index, bytes)?;
        Ok(())
    }

    /// Records metadata for a version whose content arrived elsewhere.
    pub fn set_meta(&self, id: ObjectId, meta: StoredMeta) {
        self.meta.write().insert(id, meta);
    }

    /// Returns the metadata of a version, if recorded.
    #[must_use]
    pub fn meta(&self, id: &ObjectId) -> Option<StoredMeta> {
        self.meta.read().get(id).cloned()
    }

    /// Reports how much of the version is on disk.
    #[must_use]
    pub fn state(&self, id: &ObjectId) -> OnDiskState {
        self.objects.state(id)
    }

    /// Reads a complete version's content.
    pub fn read_all(&self, id: &ObjectId) -> SyncResult<Vec<u8>> {
        Ok(self.objects.read_all(id)?)
    }

    /// Reads a byte range of a version.
    pub fn read_range(&self, id: &ObjectId, offset: u64, len: u64) -> SyncResult<Vec<u8>> {
        Ok(self.objects.read_range(id, offset, len)?)
    }

    /// Decodes a stored folder version as a listing.
    pub fn read_listing(&self, id: &ObjectId) -> SyncResult<FolderListing> {
        let bytes = self.read_all(id)?;
        Ok(FolderListing::decode(&bytes)?)
    }

    /// Re-keys a version (conflict re-label), metadata included.
    pub fn relabel(&self, from: &ObjectId, to: ObjectId) -> SyncResult<()> {
        self.objects.rename(from, to)?;
        let mut meta = self.meta.write();
        if let Some(m) = meta.remove(from) {
            meta.insert(to, m);
        }
        Ok(())
    }

    /// Drops one version object and its metadata.
    ///
    /// Only adoptions use this, to discard local content whose number a
    /// named remote version takes over.
    pub fn remove_version(&self, id: &ObjectId) {
        self.objects.remove(id);
        self.meta.write().remove(id);
    }

    /// Drops all content and metadata of an entity, across realms.
    pub fn remove_entity(&self, entity: &EntityId) {
        self.objects.remove_entity(entity);
        self.meta.write().retain(|id, _| id.entity != *entity);
    }
}
