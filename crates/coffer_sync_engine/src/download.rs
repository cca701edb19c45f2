//! Download orchestration.
//!
//! Retrieval is chunked and resumable: bytes persist as they arrive and a
//! restarted download skips chunks already on disk. Delta-encoded remote
//! versions fetch their base first and store the reconstructed full
//! content. All fetch issuance, explicit downloads and the implicit
//! range fetches triggered by plain reads alike, deduplicates through one
//! registry keyed by (entity, version), drawing task IDs from the same
//! space as uploads.
//!
//! Fetched content lands in the cache realm of the object store. Version
//! numbers at or below the synced watermark belong to the common lineage
//! and are served from the local realm when present, so a device never
//! re-fetches content it already authored or adopted.

use crate::delta::DeltaPatch;
use crate::error::{SyncError, SyncResult};
use crate::local::StoredMeta;
use crate::shared::Shared;
use coffer_core::{EntityId, EntityPath, LedgerEntry, SyncEvent, TaskId, Version};
use coffer_remote::RemoteStat;
use coffer_store::{ObjectId, ObjectLayout, OnDiskState};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

struct DownloadTask {
    task_id: TaskId,
    bytes_total: u64,
    bytes_received: AtomicU64,
    outcome: Mutex<Option<Result<(), Arc<SyncError>>>>,
    done: Condvar,
}

impl DownloadTask {
    fn wait(&self) -> Result<(), Arc<SyncError>> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

/// One registry for every fetch against a remote version: whole-version
/// tasks plus an issuance lock that serializes chunk fetching per
/// (entity, version), so explicit downloads and implicit range fetches
/// never duplicate work.
#[derive(Default)]
struct TransferRegistry {
    tasks: Mutex<HashMap<(EntityId, Version), Arc<DownloadTask>>>,
    issuance: Mutex<HashMap<(EntityId, Version), Arc<Mutex<()>>>>,
}

impl TransferRegistry {
    fn issuance_lock(&self, key: (EntityId, Version)) -> Arc<Mutex<()>> {
        Arc::clone(self.issuance.lock().entry(key).or_default())
    }
}

fn shared_lineage(entry: &LedgerEntry, version: Version) -> bool {
    entry.ledger.synced_latest.is_some_and(|synced| version <= synced)
}

/// Drives resumable retrieval of remote versions into the local cache.
pub struct DownloadOrchestrator {
    shared: Arc<Shared>,
    registry: TransferRegistry,
}

impl DownloadOrchestrator {
    pub(crate) fn new(shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self { shared, registry: TransferRegistry::default() })
    }

    /// The object the version's content should be read from: the local
    /// realm for complete common-lineage versions, the cache otherwise.
    fn read_oid(&self, entry: &LedgerEntry, version: Version) -> ObjectId {
        let local = ObjectId::local(entry.entity, version);
        if shared_lineage(entry, version)
            && self.shared.store.state(&local) == OnDiskState::Complete
        {
            local
        } else {
            ObjectId::cache(entry.entity, version)
        }
    }

    /// Reports how much of a remote version is persisted locally.
    pub fn is_remote_version_on_disk(
        &self,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<OnDiskState> {
        let entry = self.shared.ledgers.require(path)?;
        Ok(self.shared.store.state(&self.read_oid(&entry, version)))
    }

    /// Downloads a remote version to completeness, blocking.
    pub fn download(self: &Arc<Self>, path: &EntityPath, version: Version) -> SyncResult<()> {
        self.ensure_complete(path, version)
    }

    /// Starts a download without waiting.
    ///
    /// Returns `None` when the version is already complete on disk;
    /// completion of a started task is observed via `download-done`.
    pub fn start_download(
        self: &Arc<Self>,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<Option<TaskId>> {
        Ok(self.start_inner(path, version)?.map(|task| task.task_id))
    }

    /// Reads a byte range of a remote version, implicitly fetching only
    /// the chunks the range needs.
    pub fn read_remote_range(
        self: &Arc<Self>,
        path: &EntityPath,
        version: Version,
        offset: u64,
        len: u64,
    ) -> SyncResult<Vec<u8>> {
        self.ensure_range(path, version, offset, len)?;
        let entry = self.shared.ledgers.require(path)?;
        self.shared
            .store
            .read_range(&self.read_oid(&entry, version), offset, len)
    }

    /// Reads a remote version's full content, fetching what is missing.
    pub fn read_remote_all(
        self: &Arc<Self>,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<Vec<u8>> {
        self.ensure_complete(path, version)?;
        let entry = self.shared.ledgers.require(path)?;
        self.shared.store.read_all(&self.read_oid(&entry, version))
    }

    /// Returns the metadata of a remote version, statting the remote when
    /// it is not cached locally. Delta-encoded versions are reconstructed
    /// first so the reported length is the content length.
    pub fn version_meta(
        self: &Arc<Self>,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<StoredMeta> {
        let entry = self.shared.ledgers.require(path)?;
        if let Some(meta) = self.shared.store.meta(&self.read_oid(&entry, version)) {
            return Ok(meta);
        }

        self.shared.online.require_online()?;
        let stat = self.shared.remote.stat(&entry.entity, version)?;
        if stat.delta_base.is_some() {
            self.ensure_complete(path, version)?;
            let oid = self.read_oid(&entry, version);
            return self.shared.store.meta(&oid).ok_or_else(|| {
                SyncError::LedgerInvariant(format!("no metadata after reconstructing {oid}"))
            });
        }
        Ok(StoredMeta {
            len: stat.total_len,
            mtime_ms: stat.mtime_ms,
            ctime_ms: stat.ctime_ms,
            attrs: stat.attrs,
        })
    }

    /// Blocks until the version is fully on disk (in either realm).
    pub fn ensure_complete(self: &Arc<Self>, path: &EntityPath, version: Version) -> SyncResult<()> {
        match self.start_inner(path, version)? {
            None => Ok(()),
            Some(task) => task.wait().map_err(|source| SyncError::TaskFailed { source }),
        }
    }

    /// Entity-keyed variant of [`ensure_complete`](Self::ensure_complete),
    /// for callers (per-item adoption) fetching an identity the path does
    /// not resolve to yet.
    pub(crate) fn ensure_complete_for(
        self: &Arc<Self>,
        entity: EntityId,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<()> {
        match self.start_for(entity, path, version)? {
            None => Ok(()),
            Some(task) => task.wait().map_err(|source| SyncError::TaskFailed { source }),
        }
    }

    fn start_inner(
        self: &Arc<Self>,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<Option<Arc<DownloadTask>>> {
        let entry = self.shared.ledgers.require(path)?;
        // Common-lineage versions already materialized locally need no
        // fetch at all.
        if self.shared.store.state(&self.read_oid(&entry, version)) == OnDiskState::Complete {
            return Ok(None);
        }
        self.start_for(entry.entity, path, version)
    }

    fn start_for(
        self: &Arc<Self>,
        entity: EntityId,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<Option<Arc<DownloadTask>>> {
        let key = (entity, version);
        let oid = ObjectId::cache(entity, version);

        if self.shared.store.state(&oid) == OnDiskState::Complete {
            return Ok(None);
        }
        if let Some(task) = self.registry.tasks.lock().get(&key) {
            return Ok(Some(Arc::clone(task)));
        }

        self.shared.online.require_online()?;
        let stat = self.shared.remote.stat(&entity, version)?;

        let task = {
            let mut tasks = self.registry.tasks.lock();
            // A racing starter may have won while we statted.
            if let Some(existing) = tasks.get(&key) {
                return Ok(Some(Arc::clone(existing)));
            }
            let task = Arc::new(DownloadTask {
                task_id: self.shared.tasks.next(),
                bytes_total: stat.total_len,
                bytes_received: AtomicU64::new(0),
                outcome: Mutex::new(None),
                done: Condvar::new(),
            });
            tasks.insert(key, Arc::clone(&task));
            task
        };

        self.shared.bus.publish(SyncEvent::DownloadStarted {
            path: path.clone(),
            task_id: task.task_id,
            version,
            bytes_total: stat.total_len,
        });
        tracing::info!(%path, %version, bytes = stat.total_len, "download started");

        let orchestrator = Arc::clone(self);
        let worker_task = Arc::clone(&task);
        let worker_path = path.clone();
        thread::spawn(move || {
            orchestrator.run(worker_path, entity, stat, worker_task)
        });

        Ok(Some(task))
    }

    fn run(
        self: Arc<Self>,
        path: EntityPath,
        entity: EntityId,
        stat: RemoteStat,
        task: Arc<DownloadTask>,
    ) {
        let version = stat.version;
        let result = self.fetch_version(&path, entity, &stat, &task);
        match &result {
            Ok(()) => {
                self.shared.bus.publish(SyncEvent::DownloadDone {
                    path: path.clone(),
                    task_id: task.task_id,
                    version,
                });
                tracing::info!(%path, %version, "download complete");
            }
            Err(err) => {
                tracing::warn!(%path, %version, error = %err, "download failed");
            }
        }
        self.registry.tasks.lock().remove(&(entity, version));

        let mut outcome = task.outcome.lock();
        *outcome = Some(result.map_err(Arc::new));
        task.done.notify_all();
    }

    fn fetch_version(
        self: &Arc<Self>,
        path: &EntityPath,
        entity: EntityId,
        stat: &RemoteStat,
        task: &DownloadTask,
    ) -> SyncResult<()> {
        match stat.delta_base {
            None => self.fetch_full(path, entity, stat, task),
            Some(base) => self.fetch_delta(path, entity, stat, base, task),
        }
    }

    fn fetch_full(
        &self,
        path: &EntityPath,
        entity: EntityId,
        stat: &RemoteStat,
        task: &DownloadTask,
    ) -> SyncResult<()> {
        let shared = &self.shared;
        let oid = ObjectId::cache(entity, stat.version);
        shared.store.begin_version(oid, stat.total_len)?;
        let layout = ObjectLayout::new(stat.total_len, shared.store.chunk_size());

        let issuance = self.registry.issuance_lock((entity, stat.version));
        let _issuance = issuance.lock();

        let missing = shared.store.objects().missing_chunks(&oid)?;
        let missing_bytes: u64 = missing.iter().map(|i| layout.chunk_len(*i)).sum();
        let mut received = stat.total_len - missing_bytes;
        task.bytes_received.store(received, Ordering::SeqCst);

        for index in missing {
            let offset = layout.chunk_offset(index);
            let len = layout.chunk_len(index);
            let bytes = self.fetch_with_suspend(&entity, stat.version, offset, len)?;
            shared.store.put_chunk(&oid, index, bytes)?;
            received += len;
            task.bytes_received.store(received, Ordering::SeqCst);
            shared.bus.publish(SyncEvent::DownloadProgress {
                path: path.clone(),
                task_id: task.task_id,
                version: stat.version,
                bytes_received: received,
                bytes_total: task.bytes_total,
            });
        }

        shared.store.set_meta(
            oid,
            StoredMeta {
                len: stat.total_len,
                mtime_ms: stat.mtime_ms,
                ctime_ms: stat.ctime_ms,
                attrs: stat.attrs.clone(),
            },
        );
        Ok(())
    }

    fn fetch_delta(
        self: &Arc<Self>,
        path: &EntityPath,
        entity: EntityId,
        stat: &RemoteStat,
        base: Version,
        task: &DownloadTask,
    ) -> SyncResult<()> {
        // The base must be materialized first; it may itself be remote.
        // For tracked paths the common-lineage shortcut usually finds it
        // in the local realm already.
        let base_oid = match self.shared.ledgers.get(path) {
            Some(entry) if entry.entity == entity => {
                self.ensure_complete(path, base)?;
                self.read_oid(&entry, base)
            }
            _ => {
                self.ensure_complete_for(entity, path, base)?;
                ObjectId::cache(entity, base)
            }
        };

        // Fetch the encoded patch, then store the reconstructed content so
        // later readers never see the patch form.
        let shared = &self.shared;
        let chunk = u64::from(shared.store.chunk_size().max(1));
        let mut wire = Vec::with_capacity(stat.total_len as usize);
        while (wire.len() as u64) < stat.total_len {
            let offset = wire.len() as u64;
            let len = chunk.min(stat.total_len - offset);
            let bytes = self.fetch_with_suspend(&entity, stat.version, offset, len)?;
            wire.extend_from_slice(&bytes);
            task.bytes_received.store(wire.len() as u64, Ordering::SeqCst);
            shared.bus.publish(SyncEvent::DownloadProgress {
                path: path.clone(),
                task_id: task.task_id,
                version: stat.version,
                bytes_received: wire.len() as u64,
                bytes_total: task.bytes_total,
            });
        }

        let patch = DeltaPatch::decode(&wire)?;
        let base_bytes = shared.store.read_all(&base_oid)?;
        let content = patch.apply(&base_bytes)?;

        shared.store.put_version(
            ObjectId::cache(entity, stat.version),
            &content,
            StoredMeta {
                len: content.len() as u64,
                mtime_ms: stat.mtime_ms,
                ctime_ms: stat.ctime_ms,
                attrs: stat.attrs.clone(),
            },
        )?;
        Ok(())
    }

    /// Fetches one range, parking while the engine is offline and resuming
    /// after reconnect.
    fn fetch_with_suspend(
        &self,
        entity: &EntityId,
        version: Version,
        offset: u64,
        len: u64,
    ) -> SyncResult<bytes::Bytes> {
        loop {
            self.shared.online.wait_until_online();
            match self.shared.remote.fetch_chunk(entity, version, offset, len) {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_connectivity() && !self.shared.online.is_online() => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Makes sure the chunks covering `offset..offset + len` are readable,
    /// fetching only those. Reads of remote bytes, stat, and listings go
    /// through here, so a plain read triggers a best-effort fetch of only
    /// the needed range without an explicit download call.
    fn ensure_range(
        self: &Arc<Self>,
        path: &EntityPath,
        version: Version,
        offset: u64,
        len: u64,
    ) -> SyncResult<()> {
        if len == 0 {
            return Ok(());
        }
        let entry = self.shared.ledgers.require(path)?;
        let oid = self.read_oid(&entry, version);
        if oid.realm == coffer_store::Realm::Local {
            // Complete common-lineage content; nothing to fetch.
            return Ok(());
        }

        let key = (entry.entity, version);
        if let Some(layout) = self.shared.store.objects().layout(&oid) {
            let missing = self.shared.store.objects().missing_chunks(&oid)?;
            let span = layout.chunk_span(offset, len);
            if !missing.iter().any(|i| span.contains(i)) {
                return Ok(());
            }
        }

        // A whole-version task already in flight will deliver the range.
        let running = self.registry.tasks.lock().get(&key).map(Arc::clone);
        if let Some(task) = running {
            return task.wait().map_err(|source| SyncError::TaskFailed { source });
        }

        self.shared.online.require_online()?;
        let stat = self.shared.remote.stat(&entry.entity, version)?;
        if stat.delta_base.is_some() {
            // Patches only reconstruct whole contents.
            return self.ensure_complete(path, version);
        }

        self.shared.store.begin_version(oid, stat.total_len)?;
        let layout = ObjectLayout::new(stat.total_len, self.shared.store.chunk_size());

        let issuance = self.registry.issuance_lock(key);
        let _issuance = issuance.lock();
        for index in layout.chunk_span(offset, len) {
            if self.shared.store.objects().chunk(&oid, index)?.is_some() {
                continue;
            }
            let bytes = self.fetch_with_suspend(
                &entry.entity,
                version,
                layout.chunk_offset(index),
                layout.chunk_len(index),
            )?;
            self.shared.store.put_chunk(&oid, index, bytes)?;
        }
        Ok(())
    }
}
