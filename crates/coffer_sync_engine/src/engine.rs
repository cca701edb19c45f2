//! Engine facade.
//!
//! Wires the ledger book, object store, remote client, event bus, and
//! per-entity queues together and exposes the full call surface: the local
//! read/write surface that transparently bumps `local_latest`, the status
//! and diff queries, transfer orchestration, adoption, archival, and
//! remote-notice ingestion.

use crate::adopt::{AdoptOptions, AdoptionManager, FolderItemOptions};
use crate::config::EngineConfig;
use crate::diff::DiffEngine;
use crate::download::DownloadOrchestrator;
use crate::error::{SyncError, SyncResult};
use crate::local::{now_ms, LocalStore, StoredMeta};
use crate::online::OnlineGate;
use crate::queue::EntityQueues;
use crate::shared::{Shared, TaskCounter};
use crate::status::StatusComputer;
use crate::upload::{StartedUpload, UploadOptions, UploadOrchestrator};
use coffer_core::{
    EntityId, EntityKind, EntityPath, EventBus, FileDiff, FolderDiff, FolderEntry, FolderListing,
    LedgerBook, SyncEvent, SyncStatus, TaskId, Version, VersionList,
};
use coffer_remote::RemoteClient;
use coffer_store::{ObjectId, ObjectStore, OnDiskState};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// The synchronization engine: one instance per device.
///
/// Mutating operations against one entity serialize through that entity's
/// FIFO queue; operations on distinct entities proceed concurrently. Bulk
/// byte transfer runs on background threads and publishes completion
/// through the event bus.
pub struct SyncEngine {
    shared: Arc<Shared>,
    uploads: Arc<UploadOrchestrator>,
    downloads: Arc<DownloadOrchestrator>,
    adoption: AdoptionManager,
    status: StatusComputer,
    diff: DiffEngine,
}

impl SyncEngine {
    /// Creates an engine over the given object store and remote client.
    pub fn new(
        config: EngineConfig,
        objects: Arc<dyn ObjectStore>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        let shared = Arc::new(Shared {
            store: LocalStore::new(objects, config.chunk_size),
            bus: EventBus::with_max_history(config.event_history),
            ledgers: LedgerBook::new(),
            queues: EntityQueues::new(),
            online: OnlineGate::new(),
            tasks: TaskCounter::new(),
            remote,
            config,
        });
        let uploads = UploadOrchestrator::new(Arc::clone(&shared));
        let downloads = DownloadOrchestrator::new(Arc::clone(&shared));
        let adoption = AdoptionManager::new(Arc::clone(&shared), Arc::clone(&downloads));
        let status = StatusComputer::new(Arc::clone(&shared), Arc::clone(&uploads));
        let diff = DiffEngine::new(Arc::clone(&shared), Arc::clone(&downloads));
        Self { shared, uploads, downloads, adoption, status, diff }
    }

    // ---- connectivity -----------------------------------------------------

    /// Records a connectivity transition.
    ///
    /// Going offline makes server-dependent calls fail `Connectivity` and
    /// suspends in-flight transfers; going online resumes them. After an
    /// offline interval a device must explicitly re-probe
    /// (`status(path, true)`) to learn of changes made while away.
    pub fn set_online(&self, online: bool) {
        self.shared.online.set_online(online);
    }

    /// Returns the current connectivity state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.shared.online.is_online()
    }

    // ---- events -----------------------------------------------------------

    /// Subscribes to events for exactly one path.
    ///
    /// Dropping the receiver detaches the listener only; it never cancels
    /// an in-flight upload or download.
    pub fn subscribe(&self, path: &EntityPath) -> Receiver<SyncEvent> {
        self.shared.bus.subscribe(path)
    }

    /// Subscribes to a path and its descendants down to `depth` segments.
    pub fn subscribe_recursive(&self, path: &EntityPath, depth: u32) -> Receiver<SyncEvent> {
        self.shared.bus.subscribe_recursive(path, depth)
    }

    /// Returns recent events under a path, newest first.
    #[must_use]
    pub fn recent_events(&self, path: &EntityPath, limit: usize) -> Vec<SyncEvent> {
        self.shared.bus.recent(path, limit)
    }

    // ---- local surface ----------------------------------------------------

    /// Writes file content, transparently bumping `local_latest`.
    pub fn write_file(&self, path: &EntityPath, bytes: &[u8]) -> SyncResult<Version> {
        self.write_file_with_attrs(path, bytes, BTreeMap::new())
    }

    /// Writes file content with application attributes.
    pub fn write_file_with_attrs(
        &self,
        path: &EntityPath,
        bytes: &[u8],
        attrs: BTreeMap<String, String>,
    ) -> SyncResult<Version> {
        let entry = self.shared.ledgers.ensure(path, None, EntityKind::File);
        if entry.kind != EntityKind::File {
            return Err(SyncError::WrongKind { path: path.clone(), expected: EntityKind::File });
        }

        let version = {
            let _guard = self.shared.queues.lock(entry.entity);
            let fresh = self.shared.ledgers.require(path)?;
            let ctime = fresh
                .ledger
                .local_latest
                .and_then(|v| self.shared.store.meta(&ObjectId::local(entry.entity, v)))
                .map_or_else(now_ms, |m| m.ctime_ms);

            let version = self.shared.ledgers.record_local_write(path)?;
            self.shared.store.put_version(
                ObjectId::local(entry.entity, version),
                bytes,
                StoredMeta { len: bytes.len() as u64, mtime_ms: now_ms(), ctime_ms: ctime, attrs },
            )?;
            self.shared
                .bus
                .publish(SyncEvent::FileChange { path: path.clone(), version });
            version
        };

        self.link_into_parent(path, entry.entity, EntityKind::File)?;
        Ok(version)
    }

    /// Creates a folder entity with an empty listing.
    ///
    /// Returns the existing current version when the folder already has
    /// one.
    pub fn create_folder(&self, path: &EntityPath) -> SyncResult<Version> {
        let entry = self.shared.ledgers.ensure(path, None, EntityKind::Folder);
        if entry.kind != EntityKind::Folder {
            return Err(SyncError::WrongKind { path: path.clone(), expected: EntityKind::Folder });
        }

        let version = {
            let _guard = self.shared.queues.lock(entry.entity);
            let fresh = self.shared.ledgers.require(path)?;
            if let Some(existing) = fresh.ledger.local_latest {
                return Ok(existing);
            }
            let bytes = FolderListing::new().encode()?;
            let version = self.shared.ledgers.record_local_write(path)?;
            let now = now_ms();
            self.shared.store.put_version(
                ObjectId::local(entry.entity, version),
                &bytes,
                StoredMeta {
                    len: bytes.len() as u64,
                    mtime_ms: now,
                    ctime_ms: now,
                    attrs: BTreeMap::new(),
                },
            )?;
            version
        };

        self.link_into_parent(path, entry.entity, EntityKind::Folder)?;
        Ok(version)
    }

    /// Renames a child within a folder, producing a new folder version.
    pub fn rename_entry(&self, folder: &EntityPath, from: &str, to: &str) -> SyncResult<Version> {
        let fentry = self.require_folder(folder)?;
        let _guard = self.shared.queues.lock(fentry.entity);

        let fresh = self.shared.ledgers.require(folder)?;
        let mut listing = self.current_listing(&fresh)?;
        let moved = listing
            .remove(from)
            .ok_or_else(|| SyncError::not_found(&folder.child(from)))?;
        if listing.get(to).is_some() {
            return Err(SyncError::conflict(&folder.child(to)));
        }
        listing.insert(to, moved);

        let version = self.write_listing(folder, &fresh, &listing)?;
        // The child keeps its identity and ledger; only the path mapping
        // moves. A child known only from a remote listing has no local
        // ledger to move.
        match self
            .shared
            .ledgers
            .rename_subtree(&folder.child(from), &folder.child(to))
        {
            Ok(()) => {}
            Err(coffer_core::LedgerError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        self.shared.bus.publish(SyncEvent::EntryRenaming {
            path: folder.clone(),
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(version)
    }

    /// Removes a child from a folder, destroying the child's ledger and
    /// content (and those of its descendants).
    pub fn remove_entry(&self, folder: &EntityPath, name: &str) -> SyncResult<Version> {
        let fentry = self.require_folder(folder)?;
        let version = {
            let _guard = self.shared.queues.lock(fentry.entity);
            let fresh = self.shared.ledgers.require(folder)?;
            let mut listing = self.current_listing(&fresh)?;
            listing
                .remove(name)
                .ok_or_else(|| SyncError::not_found(&folder.child(name)))?;
            self.write_listing(folder, &fresh, &listing)?
        };

        for (_, removed) in self.shared.ledgers.remove_subtree(&folder.child(name)) {
            self.shared.store.remove_entity(&removed.entity);
        }
        self.shared.bus.publish(SyncEvent::EntryRemoval {
            path: folder.clone(),
            name: name.to_string(),
        });
        Ok(version)
    }

    /// Deletes an entity, its descendants, and their ledgers.
    pub fn delete_entity(&self, path: &EntityPath) -> SyncResult<()> {
        self.shared.ledgers.require(path)?;

        // Prefer going through the parent listing so watchers see the
        // removal.
        if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
            let in_parent = self
                .shared
                .ledgers
                .get(&parent)
                .filter(|p| p.kind == EntityKind::Folder)
                .map(|p| self.current_listing(&p).map(|l| l.get(name).is_some()))
                .transpose()?
                .unwrap_or(false);
            if in_parent {
                let name = name.to_string();
                self.remove_entry(&parent, &name)?;
                return Ok(());
            }
        }

        for (_, removed) in self.shared.ledgers.remove_subtree(path) {
            self.shared.store.remove_entity(&removed.entity);
        }
        Ok(())
    }

    /// Reads file content at a version (default: the local latest).
    ///
    /// Archived versions stay readable by number.
    pub fn read_file(&self, path: &EntityPath, version: Option<Version>) -> SyncResult<Vec<u8>> {
        let entry = self.shared.ledgers.require(path)?;
        if entry.kind != EntityKind::File {
            return Err(SyncError::WrongKind { path: path.clone(), expected: EntityKind::File });
        }
        let target = version
            .or(entry.ledger.local_latest)
            .ok_or_else(|| SyncError::not_found(path))?;
        self.shared.store.read_all(&ObjectId::local(entry.entity, target))
    }

    /// Reads a folder listing at a version (default: the local latest).
    pub fn read_folder(
        &self,
        path: &EntityPath,
        version: Option<Version>,
    ) -> SyncResult<FolderListing> {
        let entry = self.require_folder(path)?;
        let target = version
            .or(entry.ledger.local_latest)
            .ok_or_else(|| SyncError::not_found(path))?;
        self.shared.store.read_listing(&ObjectId::local(entry.entity, target))
    }

    /// Lists the current and archived versions of an entity.
    pub fn list_versions(&self, path: &EntityPath) -> SyncResult<VersionList> {
        Ok(self.shared.ledgers.list_versions(path)?)
    }

    /// Returns the stable identity of an entity, used to address it on the
    /// remote and to share it with other devices.
    #[must_use]
    pub fn entity_id(&self, path: &EntityPath) -> Option<EntityId> {
        self.shared.ledgers.entity_id(path)
    }

    // ---- status -----------------------------------------------------------

    /// Returns the entity's sync status; see [`StatusComputer::status`].
    pub fn status(&self, path: &EntityPath, force_server_probe: bool) -> SyncResult<SyncStatus> {
        self.status.status(path, force_server_probe)
    }

    /// Refreshes the cached remote version (two-call compatibility shim).
    pub fn update_status_info(&self, path: &EntityPath) -> SyncResult<()> {
        self.status.update_status_info(path)
    }

    // ---- transfers --------------------------------------------------------

    /// Uploads the local latest version, waiting for completion.
    pub fn upload(&self, path: &EntityPath, opts: UploadOptions) -> SyncResult<Option<Version>> {
        self.uploads.upload(path, opts)
    }

    /// Starts an upload without waiting.
    pub fn start_upload(
        &self,
        path: &EntityPath,
        opts: UploadOptions,
    ) -> SyncResult<Option<StartedUpload>> {
        self.uploads.start_upload(path, opts)
    }

    /// Reports how much of a remote version is persisted locally.
    pub fn is_remote_version_on_disk(
        &self,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<OnDiskState> {
        self.downloads.is_remote_version_on_disk(path, version)
    }

    /// Downloads a remote version to completeness, blocking.
    pub fn download(&self, path: &EntityPath, version: Version) -> SyncResult<()> {
        self.downloads.download(path, version)
    }

    /// Starts a download; `None` when the version is already complete.
    pub fn start_download(
        &self,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<Option<TaskId>> {
        self.downloads.start_download(path, version)
    }

    /// Reads a byte range of a remote version, implicitly fetching only
    /// the needed chunks.
    pub fn read_remote_bytes(
        &self,
        path: &EntityPath,
        version: Version,
        offset: u64,
        len: u64,
    ) -> SyncResult<Vec<u8>> {
        self.downloads.read_remote_range(path, version, offset, len)
    }

    /// Reads a remote version's full content, fetching what is missing.
    pub fn read_remote_version(&self, path: &EntityPath, version: Version) -> SyncResult<Vec<u8>> {
        self.downloads.read_remote_all(path, version)
    }

    /// Reads a remote folder version's listing.
    pub fn read_remote_folder(
        &self,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<FolderListing> {
        Ok(FolderListing::decode(&self.downloads.read_remote_all(path, version)?)?)
    }

    // ---- adoption, archival, diff -----------------------------------------

    /// Adopts a remote version for the whole entity.
    pub fn adopt_remote(&self, path: &EntityPath, opts: AdoptOptions) -> SyncResult<()> {
        self.adoption.adopt_remote(path, opts)
    }

    /// Imports one remote folder child, returning the new folder version.
    pub fn adopt_remote_folder_item(
        &self,
        folder: &EntityPath,
        item_name: &str,
        opts: FolderItemOptions,
    ) -> SyncResult<Version> {
        self.adoption.adopt_remote_folder_item(folder, item_name, opts)
    }

    /// Archives the current synced version; see
    /// [`AdoptionManager::archive_current`].
    pub fn archive_current(
        &self,
        path: &EntityPath,
        version: Option<Version>,
    ) -> SyncResult<Version> {
        self.adoption.archive_current(path, version)
    }

    /// Diffs the current local file version against a remote version.
    pub fn diff_current_and_remote_versions(
        &self,
        path: &EntityPath,
        remote_version: Option<Version>,
        compare_content_if_same_mtime: bool,
    ) -> SyncResult<Option<FileDiff>> {
        self.diff
            .diff_file_versions(path, remote_version, compare_content_if_same_mtime)
    }

    /// Diffs the current local folder listing against a remote one.
    pub fn diff_current_and_remote_folder_versions(
        &self,
        path: &EntityPath,
        remote_version: Option<Version>,
    ) -> SyncResult<Option<FolderDiff>> {
        self.diff.diff_folder_versions(path, remote_version)
    }

    // ---- remote-notice ingestion ------------------------------------------

    /// Ingests a server push (or out-of-band share) announcing a remote
    /// version. Creates the ledger on first remote knowledge.
    pub fn observe_remote_change(
        &self,
        path: &EntityPath,
        entity: EntityId,
        kind: EntityKind,
        version: Version,
    ) -> SyncResult<()> {
        self.shared.ledgers.ensure(path, Some(entity), kind);
        if self.shared.ledgers.set_remote_latest(path, version)? {
            self.shared
                .bus
                .publish(SyncEvent::RemoteChange { path: path.clone(), version });
        }
        Ok(())
    }

    /// Ingests a remote-removal notice.
    pub fn observe_remote_removal(&self, path: &EntityPath) -> SyncResult<()> {
        self.shared.ledgers.require(path)?;
        self.shared.ledgers.clear_remote(path)?;
        self.shared
            .bus
            .publish(SyncEvent::RemoteRemoval { path: path.clone() });
        Ok(())
    }

    /// Ingests a remote version-archival notice.
    pub fn observe_remote_version_archival(
        &self,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<()> {
        self.shared.ledgers.require(path)?;
        self.shared
            .bus
            .publish(SyncEvent::RemoteVersionArchival { path: path.clone(), version });
        Ok(())
    }

    /// Ingests a notice that an archived version was removed remotely.
    pub fn observe_remote_archived_removal(
        &self,
        path: &EntityPath,
        version: Version,
    ) -> SyncResult<()> {
        self.shared.ledgers.require(path)?;
        self.shared
            .bus
            .publish(SyncEvent::RemoteArchVerRemoval { path: path.clone(), version });
        Ok(())
    }

    // ---- internals --------------------------------------------------------

    fn require_folder(&self, path: &EntityPath) -> SyncResult<coffer_core::LedgerEntry> {
        let entry = self.shared.ledgers.require(path)?;
        if entry.kind != EntityKind::Folder {
            return Err(SyncError::WrongKind { path: path.clone(), expected: EntityKind::Folder });
        }
        Ok(entry)
    }

    fn current_listing(&self, entry: &coffer_core::LedgerEntry) -> SyncResult<FolderListing> {
        match entry.ledger.local_latest {
            Some(v) => self
                .shared
                .store
                .read_listing(&ObjectId::local(entry.entity, v)),
            None => Ok(FolderListing::new()),
        }
    }

    /// Writes a folder's listing as a new local version. Caller holds the
    /// folder queue.
    fn write_listing(
        &self,
        folder: &EntityPath,
        entry: &coffer_core::LedgerEntry,
        listing: &FolderListing,
    ) -> SyncResult<Version> {
        let ctime = entry
            .ledger
            .local_latest
            .and_then(|v| self.shared.store.meta(&ObjectId::local(entry.entity, v)))
            .map_or_else(now_ms, |m| m.ctime_ms);
        let bytes = listing.encode()?;
        let version = self.shared.ledgers.record_local_write(folder)?;
        self.shared.store.put_version(
            ObjectId::local(entry.entity, version),
            &bytes,
            StoredMeta {
                len: bytes.len() as u64,
                mtime_ms: now_ms(),
                ctime_ms: ctime,
                attrs: BTreeMap::new(),
            },
        )?;
        Ok(version)
    }

    /// Adds a freshly created entity to its parent folder's listing, when
    /// a tracked parent exists.
    fn link_into_parent(
        &self,
        path: &EntityPath,
        entity: EntityId,
        kind: EntityKind,
    ) -> SyncResult<()> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Ok(());
        };
        let Some(pentry) = self.shared.ledgers.get(&parent) else {
            return Ok(());
        };
        if pentry.kind != EntityKind::Folder {
            return Ok(());
        }

        let _guard = self.shared.queues.lock(pentry.entity);
        let fresh = self.shared.ledgers.require(&parent)?;
        let mut listing = self.current_listing(&fresh)?;
        if listing.get(name).map(|e| e.entity) == Some(entity) {
            return Ok(());
        }
        listing.insert(name, FolderEntry { entity, kind });
        self.write_listing(&parent, &fresh, &listing)?;
        self.shared.bus.publish(SyncEvent::EntryAddition {
            path: parent,
            name: name.to_string(),
        });
        Ok(())
    }
}
