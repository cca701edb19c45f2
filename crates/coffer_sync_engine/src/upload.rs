//! Upload orchestration.
//!
//! Publishes a local version to the remote. The version-number start step
//! (validation, optional conflict re-label, task registration) runs inside
//! the entity's serialization queue; bulk chunk transfer runs on a
//! background thread; the commit step re-enters the queue to advance the
//! synced branch and emit `upload-done`.
//!
//! At most one upload task exists per entity: a concurrent call joins the
//! in-flight task rather than duplicating work.

use crate::delta::DeltaPatch;
use crate::error::{SyncError, SyncResult};
use crate::shared::Shared;
use bytes::Bytes;
use coffer_core::{
    derive_state, EntityId, EntityKind, EntityPath, SyncEvent, SyncState, TaskId, UploadProgress,
    Version,
};
use coffer_remote::VersionMeta;
use coffer_store::{ObjectId, OnDiskState};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Options for an upload call.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// When given, the upload fails `VersionMismatch` unless this equals
    /// the current local latest.
    pub local_version: Option<Version>,
    /// The version number to publish under. Mandatory (and greater than
    /// the remote's known latest) when the entity is conflicting; this is
    /// the guard against silently clobbering a concurrent remote edit.
    pub upload_version: Option<Version>,
}

/// Handle returned by a fire-and-forget upload start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedUpload {
    /// The task's identifier.
    pub task_id: TaskId,
    /// The version being published.
    pub upload_version: Version,
}

struct UploadTask {
    task_id: TaskId,
    version: Version,
    bytes_total: u64,
    bytes_sent: AtomicU64,
    outcome: Mutex<Option<Result<Version, Arc<SyncError>>>>,
    done: Condvar,
}

impl UploadTask {
    fn wait(&self) -> Result<Version, Arc<SyncError>> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

/// Drives uploads, one task per entity at most.
pub struct UploadOrchestrator {
    shared: Arc<Shared>,
    active: Mutex<HashMap<EntityId, Arc<UploadTask>>>,
}

impl UploadOrchestrator {
    pub(crate) fn new(shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self { shared, active: Mutex::new(HashMap::new()) })
    }

    /// Uploads the local latest version and waits for completion.
    ///
    /// Returns `None` without transferring anything when local and synced
    /// already agree.
    pub fn upload(
        self: &Arc<Self>,
        path: &EntityPath,
        opts: UploadOptions,
    ) -> SyncResult<Option<Version>> {
        match self.start_inner(path, opts)? {
            None => Ok(None),
            Some(task) => match task.wait() {
                Ok(version) => Ok(Some(version)),
                Err(source) => Err(SyncError::TaskFailed { source }),
            },
        }
    }

    /// Starts an upload without waiting; completion is observed via the
    /// `upload-done` event.
    pub fn start_upload(
        self: &Arc<Self>,
        path: &EntityPath,
        opts: UploadOptions,
    ) -> SyncResult<Option<StartedUpload>> {
        Ok(self.start_inner(path, opts)?.map(|task| StartedUpload {
            task_id: task.task_id,
            upload_version: task.version,
        }))
    }

    /// Progress of the in-flight upload for an entity, if one exists.
    pub(crate) fn progress(&self, entity: &EntityId) -> Option<UploadProgress> {
        self.active.lock().get(entity).map(|task| UploadProgress {
            task_id: task.task_id,
            version: task.version,
            bytes_total: task.bytes_total,
            bytes_sent: task.bytes_sent.load(Ordering::SeqCst),
        })
    }

    fn start_inner(
        self: &Arc<Self>,
        path: &EntityPath,
        opts: UploadOptions,
    ) -> SyncResult<Option<Arc<UploadTask>>> {
        let shared = &self.shared;
        let entity = shared.ledgers.require(path)?.entity;
        let _guard = shared.queues.lock(entity);

        // Single-flight: join the task already in the air.
        if let Some(task) = self.active.lock().get(&entity) {
            return Ok(Some(Arc::clone(task)));
        }

        let entry = shared.ledgers.require(path)?;
        let ledger = &entry.ledger;
        let Some(local) = ledger.local_latest else {
            return Ok(None);
        };
        if let Some(expected) = opts.local_version {
            if expected != local {
                return Err(SyncError::version_mismatch(format!(
                    "local latest is {local}, caller expected {expected}"
                )));
            }
        }
        if ledger.synced_latest == Some(local) {
            return Ok(None);
        }

        let upload_version = if derive_state(ledger) == SyncState::Conflicting {
            let remote_latest = ledger.remote_known_latest.ok_or_else(|| {
                SyncError::LedgerInvariant("conflicting state without remote knowledge".into())
            })?;
            match opts.upload_version {
                Some(v) if v > remote_latest => v,
                _ => {
                    return Err(SyncError::version_mismatch(format!(
                        "conflicting entity requires an explicit upload version past remote {remote_latest}"
                    )))
                }
            }
        } else {
            opts.upload_version.unwrap_or(local)
        };

        if upload_version != local
            && upload_version <= ledger.highest_seen().unwrap_or(Version(0))
        {
            return Err(SyncError::version_mismatch(format!(
                "upload version {upload_version} is not past every known version"
            )));
        }

        // Folder uploads publish structure only, and every listed child
        // must itself have been published.
        let local_oid = ObjectId::local(entity, local);
        if entry.kind == EntityKind::Folder {
            let listing = shared.store.read_listing(&local_oid)?;
            for name in listing.entries.keys() {
                let published = shared
                    .ledgers
                    .get(&path.child(name))
                    .and_then(|child| child.ledger.synced_latest);
                if published.is_none() {
                    return Err(SyncError::ChildNeverUploaded { child: name.clone() });
                }
            }
        }

        shared.online.require_online()?;

        let oid = if upload_version == local {
            local_oid
        } else {
            shared.ledgers.relabel_local_head(path, upload_version)?;
            let to = ObjectId::local(entity, upload_version);
            shared.store.relabel(&local_oid, to)?;
            to
        };

        let content = shared.store.read_all(&oid)?;
        let meta = shared.store.meta(&oid).unwrap_or_default();
        let (wire, delta_base) = self.choose_encoding(entity, ledger.synced_latest, &content);

        let task = Arc::new(UploadTask {
            task_id: shared.tasks.next(),
            version: upload_version,
            bytes_total: wire.len() as u64,
            bytes_sent: AtomicU64::new(0),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        });
        self.active.lock().insert(entity, Arc::clone(&task));

        shared.bus.publish(SyncEvent::UploadStarted {
            path: path.clone(),
            task_id: task.task_id,
            version: upload_version,
            bytes_total: task.bytes_total,
        });
        tracing::info!(
            %path,
            version = %upload_version,
            bytes = task.bytes_total,
            delta = delta_base.is_some(),
            "upload started"
        );

        let remote_meta = VersionMeta {
            kind: entry.kind,
            total_len: wire.len() as u64,
            mtime_ms: meta.mtime_ms,
            ctime_ms: meta.ctime_ms,
            attrs: meta.attrs,
            delta_base,
        };
        let orchestrator = Arc::clone(self);
        let worker_task = Arc::clone(&task);
        let worker_path = path.clone();
        thread::spawn(move || {
            orchestrator.run(worker_path, entity, worker_task, wire, remote_meta)
        });

        Ok(Some(task))
    }

    /// Delta against the synced ancestor when the patch is strictly
    /// smaller; full content otherwise. A bandwidth choice only: the
    /// receiver reconstructs byte-identical content either way.
    fn choose_encoding(
        &self,
        entity: EntityId,
        ancestor: Option<Version>,
        content: &[u8],
    ) -> (Vec<u8>, Option<Version>) {
        let full = || (content.to_vec(), None);
        if !self.shared.config.delta_enabled {
            return full();
        }
        let Some(base) = ancestor else {
            return full();
        };
        let base_oid = ObjectId::local(entity, base);
        if self.shared.store.state(&base_oid) != OnDiskState::Complete {
            return full();
        }
        let Ok(base_bytes) = self.shared.store.read_all(&base_oid) else {
            return full();
        };
        let patch = DeltaPatch::compute(base, &base_bytes, content);
        match patch.encode() {
            Ok(encoded) if encoded.len() < content.len() => (encoded, Some(base)),
            _ => full(),
        }
    }

    fn run(
        self: Arc<Self>,
        path: EntityPath,
        entity: EntityId,
        task: Arc<UploadTask>,
        wire: Vec<u8>,
        meta: VersionMeta,
    ) {
        let result = self.transfer(&path, entity, &task, &wire, &meta);
        if let Err(err) = &result {
            tracing::warn!(%path, version = %task.version, error = %err, "upload failed");
        }
        self.active.lock().remove(&entity);

        let mut outcome = task.outcome.lock();
        *outcome = Some(result.map_err(Arc::new));
        task.done.notify_all();
    }

    fn transfer(
        &self,
        path: &EntityPath,
        entity: EntityId,
        task: &UploadTask,
        wire: &[u8],
        meta: &VersionMeta,
    ) -> SyncResult<Version> {
        let shared = &self.shared;
        let version = task.version;
        shared.remote.begin_version(&entity, version, meta)?;

        let chunk = (shared.config.chunk_size as usize).max(1);
        let mut offset = 0usize;
        while offset < wire.len() {
            // Network loss parks the transfer; it resumes where it left
            // off after reconnect.
            shared.online.wait_until_online();
            let end = (offset + chunk).min(wire.len());
            match shared.remote.push_chunk(
                &entity,
                version,
                offset as u64,
                Bytes::copy_from_slice(&wire[offset..end]),
            ) {
                Ok(()) => {
                    offset = end;
                    task.bytes_sent.store(offset as u64, Ordering::SeqCst);
                }
                Err(err) if err.is_connectivity() && !shared.online.is_online() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        shared.remote.commit_version(&entity, version)?;

        // Commit step: advance the synced branch under the entity queue.
        let _guard = shared.queues.lock(entity);
        shared.ledgers.record_synced_version(path, version)?;
        shared.bus.publish(SyncEvent::UploadDone {
            path: path.clone(),
            task_id: task.task_id,
            version,
        });
        tracing::info!(%path, %version, "upload committed");
        Ok(version)
    }
}
