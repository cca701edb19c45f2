//! In-memory object store.

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectId, ObjectLayout, ObjectStore, OnDiskState};
use bytes::Bytes;
use coffer_core::EntityId;
use parking_lot::RwLock;
use std::collections::HashMap;

struct StoredObject {
    layout: ObjectLayout,
    chunks: HashMap<u32, Bytes>,
}

/// An in-memory object store.
///
/// Holds every chunk in memory. Suitable for unit and integration tests and
/// as the cache tier behind an encrypting wrapper.
///
/// # Thread Safety
///
/// The store is thread-safe and can be shared across threads.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
}

impl MemoryObjectStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of known objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn create(&self, id: ObjectId, layout: ObjectLayout) -> StoreResult<()> {
        let mut objects = self.objects.write();
        if let Some(existing) = objects.get(&id) {
            if existing.layout != layout {
                return Err(StoreError::LayoutMismatch { key: id.to_string() });
            }
            return Ok(());
        }
        objects.insert(id, StoredObject { layout, chunks: HashMap::new() });
        Ok(())
    }

    fn layout(&self, id: &ObjectId) -> Option<ObjectLayout> {
        self.objects.read().get(id).map(|o| o.layout)
    }

    fn put_chunk(&self, id: &ObjectId, index: u32, bytes: Bytes) -> StoreResult<()> {
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(id)
            .ok_or_else(|| StoreError::unknown_object(id))?;
        let count = object.layout.chunk_count();
        if index >= count {
            return Err(StoreError::ChunkOutOfRange { index, count });
        }
        let expected = object.layout.chunk_len(index);
        if bytes.len() as u64 != expected {
            return Err(StoreError::ChunkSizeMismatch {
                index,
                expected,
                actual: bytes.len() as u64,
            });
        }
        object.chunks.insert(index, bytes);
        Ok(())
    }

    fn chunk(&self, id: &ObjectId, index: u32) -> StoreResult<Option<Bytes>> {
        let objects = self.objects.read();
        let object = objects
            .get(id)
            .ok_or_else(|| StoreError::unknown_object(id))?;
        Ok(object.chunks.get(&index).cloned())
    }

    fn missing_chunks(&self, id: &ObjectId) -> StoreResult<Vec<u32>> {
        let objects = self.objects.read();
        let object = objects
            .get(id)
            .ok_or_else(|| StoreError::unknown_object(id))?;
        Ok((0..object.layout.chunk_count())
            .filter(|i| !object.chunks.contains_key(i))
            .collect())
    }

    fn state(&self, id: &ObjectId) -> OnDiskState {
        let objects = self.objects.read();
        match objects.get(id) {
            None => OnDiskState::Missing,
            Some(object) => {
                if object.chunks.len() as u32 == object.layout.chunk_count() {
                    OnDiskState::Complete
                } else {
                    OnDiskState::Partial
                }
            }
        }
    }

    fn read_range(&self, id: &ObjectId, offset: u64, len: u64) -> StoreResult<Vec<u8>> {
        let objects = self.objects.read();
        let object = objects
            .get(id)
            .ok_or_else(|| StoreError::unknown_object(id))?;
        let size = object.layout.total_len;
        if offset + len > size {
            return Err(StoreError::ReadPastEnd { offset, len, size });
        }

        let mut out = Vec::with_capacity(len as usize);
        for index in object.layout.chunk_span(offset, len) {
            let chunk = object
                .chunks
                .get(&index)
                .ok_or(StoreError::MissingChunk { index })?;
            let chunk_start = object.layout.chunk_offset(index);
            let from = offset.saturating_sub(chunk_start) as usize;
            let to = ((offset + len - chunk_start).min(chunk.len() as u64)) as usize;
            out.extend_from_slice(&chunk[from..to]);
        }
        Ok(out)
    }

    fn read_all(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
        if self.state(id) != OnDiskState::Complete {
            return Err(StoreError::Incomplete { key: id.to_string() });
        }
        let total = self
            .layout(id)
            .map(|l| l.total_len)
            .ok_or_else(|| StoreError::unknown_object(id))?;
        self.read_range(id, 0, total)
    }

    fn rename(&self, from: &ObjectId, to: ObjectId) -> StoreResult<()> {
        let mut objects = self.objects.write();
        let object = objects
            .remove(from)
            .ok_or_else(|| StoreError::unknown_object(from))?;
        objects.insert(to, object);
        Ok(())
    }

    fn remove(&self, id: &ObjectId) {
        self.objects.write().remove(id);
    }

    fn remove_entity(&self, entity: &EntityId) {
        self.objects.write().retain(|id, _| id.entity != *entity);
    }
}
