//! In-memory remote store.
//!
//! A [`MemoryRemote`] behaves like the remote service: committed versions
//! are immutable and visible to probes, open uploads are invisible until
//! committed. Shared behind an `Arc` it doubles as a loopback server for
//! multi-device tests, and it supports failure injection for offline and
//! interrupted-transfer scenarios.

use crate::client::{RemoteClient, RemoteStat, VersionMeta};
use crate::error::{RemoteError, RemoteResult};
use bytes::Bytes;
use coffer_core::{EntityId, Version};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

struct RemoteVersion {
    meta: VersionMeta,
    data: Vec<u8>,
    committed: bool,
}

/// An in-memory implementation of [`RemoteClient`].
#[derive(Default)]
pub struct MemoryRemote {
    entities: RwLock<HashMap<EntityId, BTreeMap<Version, RemoteVersion>>>,
    offline: AtomicBool,
    /// Number of upcoming fetches that should fail with a connectivity
    /// error, for interrupted-download tests.
    fetch_failures: AtomicU64,
}

impl MemoryRemote {
    /// Creates an empty remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing or regaining the network.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `n` chunk fetches fail with a connectivity error.
    pub fn inject_fetch_failures(&self, n: u64) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// Returns the number of committed versions across all entities.
    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.entities
            .read()
            .values()
            .flat_map(|versions| versions.values())
            .filter(|v| v.committed)
            .count()
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::connectivity("remote unreachable"))
        } else {
            Ok(())
        }
    }
}

impl RemoteClient for MemoryRemote {
    fn probe_latest(&self, entity: &EntityId) -> RemoteResult<Option<Version>> {
        self.check_online()?;
        let entities = self.entities.read();
        Ok(entities.get(entity).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|(_, v)| v.committed)
                .map(|(version, _)| *version)
        }))
    }

    fn stat(&self, entity: &EntityId, version: Version) -> RemoteResult<RemoteStat> {
        self.check_online()?;
        let entities = self.entities.read();
        let stored = entities
            .get(entity)
            .and_then(|versions| versions.get(&version))
            .filter(|v| v.committed)
            .ok_or_else(|| RemoteError::UnknownVersion {
                entity: entity.to_string(),
                version: version.to_string(),
            })?;
        Ok(RemoteStat {
            version,
            kind: stored.meta.kind,
            total_len: stored.meta.total_len,
            mtime_ms: stored.meta.mtime_ms,
            ctime_ms: stored.meta.ctime_ms,
            attrs: stored.meta.attrs.clone(),
            delta_base: stored.meta.delta_base,
        })
    }

    fn fetch_chunk(
        &self,
        entity: &EntityId,
        version: Version,
        offset: u64,
        len: u64,
    ) -> RemoteResult<Bytes> {
        self.check_online()?;
        if self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::connectivity("injected fetch failure"));
        }

        let entities = self.entities.read();
        let stored = entities
            .get(entity)
            .and_then(|versions| versions.get(&version))
            .filter(|v| v.committed)
            .ok_or_else(|| RemoteError::UnknownVersion {
                entity: entity.to_string(),
                version: version.to_string(),
            })?;

        let end = offset
            .checked_add(len)
            .filter(|end| *end <= stored.data.len() as u64)
            .ok_or_else(|| {
                RemoteError::Protocol(format!(
                    "range {offset}+{len} exceeds content of {} bytes",
                    stored.data.len()
                ))
            })?;
        Ok(Bytes::copy_from_slice(&stored.data[offset as usize..end as usize]))
    }

    fn begin_version(
        &self,
        entity: &EntityId,
        version: Version,
        meta: &VersionMeta,
    ) -> RemoteResult<()> {
        self.check_online()?;
        let mut entities = self.entities.write();
        let versions = entities.entry(*entity).or_default();
        if versions.get(&version).is_some_and(|v| v.committed) {
            return Err(RemoteError::VersionExists {
                entity: entity.to_string(),
                version: version.to_string(),
            });
        }
        // Re-opening an uncommitted version restarts its upload.
        versions.insert(
            version,
            RemoteVersion { meta: meta.clone(), data: Vec::new(), committed: false },
        );
        Ok(())
    }

    fn push_chunk(
        &self,
        entity: &EntityId,
        version: Version,
        offset: u64,
        bytes: Bytes,
    ) -> RemoteResult<()> {
        self.check_online()?;
        let mut entities = self.entities.write();
        let stored = entities
            .get_mut(entity)
            .and_then(|versions| versions.get_mut(&version))
            .filter(|v| !v.committed)
            .ok_or_else(|| RemoteError::UnknownVersion {
                entity: entity.to_string(),
                version: version.to_string(),
            })?;
        if offset != stored.data.len() as u64 {
            return Err(RemoteError::Protocol(format!(
                "non-contiguous push at {offset}, have {}",
                stored.data.len()
            )));
        }
        stored.data.extend_from_slice(&bytes);
        Ok(())
    }

    fn commit_version(&self, entity: &EntityId, version: Version) -> RemoteResult<()> {
        self.check_online()?;
        let mut entities = self.entities.write();
        let stored = entities
            .get_mut(entity)
            .and_then(|versions| versions.get_mut(&version))
            .ok_or_else(|| RemoteError::UnknownVersion {
                entity: entity.to_string(),
                version: version.to_string(),
            })?;
        if stored.data.len() as u64 != stored.meta.total_len {
            return Err(RemoteError::Protocol(format!(
                "commit of incomplete version: {} of {} bytes",
                stored.data.len(),
                stored.meta.total_len
            )));
        }
        stored.committed = true;
        tracing::debug!(%entity, %version, len = stored.meta.total_len, "remote version committed");
        Ok(())
    }
}
