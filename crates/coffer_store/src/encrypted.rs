//! Encrypting object store wrapper.
//!
//! Wraps any [`ObjectStore`] and encrypts every chunk independently with the
//! configured [`Cryptor`]. Because the AEAD overhead per chunk is constant,
//! the inner store's layout is derived deterministically from the plaintext
//! layout: inner chunk size is `chunk_size + CIPHER_OVERHEAD` and the inner
//! total length adds the overhead once per chunk. Completeness therefore
//! delegates chunk-for-chunk to the inner store.

use crate::crypto::{Cryptor, CIPHER_OVERHEAD};
use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectId, ObjectLayout, ObjectStore, OnDiskState};
use bytes::Bytes;
use coffer_core::EntityId;
use std::sync::Arc;

/// An object store that encrypts chunks at rest.
pub struct EncryptedObjectStore {
    inner: Arc<dyn ObjectStore>,
    cryptor: Arc<dyn Cryptor>,
}

impl EncryptedObjectStore {
    /// Creates an encrypting wrapper over `inner`.
    pub fn new(inner: Arc<dyn ObjectStore>, cryptor: Arc<dyn Cryptor>) -> Self {
        Self { inner, cryptor }
    }

    fn inner_layout(layout: ObjectLayout) -> ObjectLayout {
        let chunks = u64::from(layout.chunk_count());
        ObjectLayout::new(
            layout.total_len + chunks * CIPHER_OVERHEAD as u64,
            layout.chunk_size + CIPHER_OVERHEAD as u32,
        )
    }

    fn plain_layout(inner: ObjectLayout) -> ObjectLayout {
        let chunk_size = inner.chunk_size - CIPHER_OVERHEAD as u32;
        let chunks = u64::from(inner.chunk_count());
        ObjectLayout::new(inner.total_len - chunks * CIPHER_OVERHEAD as u64, chunk_size)
    }

    fn require_plain_layout(&self, id: &ObjectId) -> StoreResult<ObjectLayout> {
        self.inner
            .layout(id)
            .map(Self::plain_layout)
            .ok_or_else(|| StoreError::unknown_object(id))
    }

    fn decrypt_chunk(&self, id: &ObjectId, index: u32) -> StoreResult<Option<Vec<u8>>> {
        match self.inner.chunk(id, index)? {
            None => Ok(None),
            Some(sealed) => match self.cryptor.decrypt(&sealed) {
                Ok(plain) => Ok(Some(plain)),
                Err(err) => {
                    if err.is_cipher_verification() {
                        tracing::warn!(object = %id, index, "chunk failed cipher verification");
                    }
                    Err(err)
                }
            },
        }
    }
}

impl ObjectStore for EncryptedObjectStore {
    fn create(&self, id: ObjectId, layout: ObjectLayout) -> StoreResult<()> {
        self.inner.create(id, Self::inner_layout(layout))
    }

    fn layout(&self, id: &ObjectId) -> Option<ObjectLayout> {
        self.inner.layout(id).map(Self::plain_layout)
    }

    fn put_chunk(&self, id: &ObjectId, index: u32, bytes: Bytes) -> StoreResult<()> {
        // Validate against the plaintext layout first so callers see
        // plaintext lengths in errors.
        let layout = self.require_plain_layout(id)?;
        let count = layout.chunk_count();
        if index >= count {
            return Err(StoreError::ChunkOutOfRange { index, count });
        }
        let expected = layout.chunk_len(index);
        if bytes.len() as u64 != expected {
            return Err(StoreError::ChunkSizeMismatch {
                index,
                expected,
                actual: bytes.len() as u64,
            });
        }
        let sealed = self.cryptor.encrypt(&bytes)?;
        self.inner.put_chunk(id, index, Bytes::from(sealed))
    }

    fn chunk(&self, id: &ObjectId, index: u32) -> StoreResult<Option<Bytes>> {
        Ok(self.decrypt_chunk(id, index)?.map(Bytes::from))
    }

    fn missing_chunks(&self, id: &ObjectId) -> StoreResult<Vec<u32>> {
        self.inner.missing_chunks(id)
    }

    fn state(&self, id: &ObjectId) -> OnDiskState {
        self.inner.state(id)
    }

    fn read_range(&self, id: &ObjectId, offset: u64, len: u64) -> StoreResult<Vec<u8>> {
        let layout = self.require_plain_layout(id)?;
        if offset + len > layout.total_len {
            return Err(StoreError::ReadPastEnd { offset, len, size: layout.total_len });
        }

        let mut out = Vec::with_capacity(len as usize);
        for index in layout.chunk_span(offset, len) {
            let chunk = self
                .decrypt_chunk(id, index)?
                .ok_or(StoreError::MissingChunk { index })?;
            let chunk_start = layout.chunk_offset(index);
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
        let layout = self.require_plain_layout(id)?;
        self.read_range(id, 0, layout.total_len)
    }

    fn rename(&self, from: &ObjectId, to: ObjectId) -> StoreResult<()> {
        self.inner.rename(from, to)
    }

    fn remove(&self, id: &ObjectId) {
        self.inner.remove(id);
    }

    fn remove_entity(&self, entity: &EntityId) {
        self.inner.remove_entity(entity);
    }
}
