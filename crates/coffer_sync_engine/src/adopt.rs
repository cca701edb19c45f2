//! Adoption of remote state and version archival.
//!
//! Adoption merges remote state into local/synced state under the
//! conflict-safety rules: a `behind` entity merges the known remote version
//! directly, a `conflicting` one only when the caller names the winning
//! version. Local edits since the last synced version are then discarded;
//! anything worth keeping is expected to have been extracted through the
//! diff engine first. Content is materialized outside the entity queue;
//! only the ledger switch is serialized.

use crate::download::DownloadOrchestrator;
use crate::error::{SyncError, SyncResult};
use crate::local::{now_ms, StoredMeta};
use crate::shared::Shared;
use coffer_core::{
    derive_state, Branch, EntityKind, EntityPath, FolderListing, SyncEvent, SyncState, Version,
};
use coffer_store::ObjectId;
use std::sync::Arc;

/// Options for whole-entity adoption.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdoptOptions {
    /// Names the remote version to adopt. Mandatory when the entity is
    /// conflicting; the named version then unconditionally replaces
    /// local and synced state.
    pub remote_version: Option<Version>,
}

/// Options for adopting one folder child.
#[derive(Debug, Clone, Copy, Default)]
pub struct FolderItemOptions {
    /// Allow replacing a local child whose identity differs from the
    /// remote one. Without it, an identity overlap fails `Conflict`.
    pub replace_local_item: bool,
    /// When given, the folder's local latest must match.
    pub local_version: Option<Version>,
    /// Remote folder version to read the child from (default: the last
    /// known remote latest).
    pub remote_version: Option<Version>,
}

/// Merges remote state into local state and archives synced versions.
pub struct AdoptionManager {
    shared: Arc<Shared>,
    downloads: Arc<DownloadOrchestrator>,
}

impl AdoptionManager {
    pub(crate) fn new(shared: Arc<Shared>, downloads: Arc<DownloadOrchestrator>) -> Self {
        Self { shared, downloads }
    }

    /// Adopts a remote version for the whole entity.
    ///
    /// No-op when already synced. Fails `Conflict` when both branches
    /// diverged and no version was named.
    pub fn adopt_remote(&self, path: &EntityPath, opts: AdoptOptions) -> SyncResult<()> {
        let shared = &self.shared;
        let entity = shared.ledgers.require(path)?.entity;

        // Decide the target under the queue.
        let target = {
            let _guard = shared.queues.lock(entity);
            let entry = shared.ledgers.require(path)?;
            match (derive_state(&entry.ledger), opts.remote_version) {
                (SyncState::Synced | SyncState::Unsynced, None) => return Ok(()),
                (SyncState::Conflicting, None) => return Err(SyncError::conflict(path)),
                (SyncState::Behind, None) => {
                    entry.ledger.remote_known_latest.ok_or_else(|| {
                        SyncError::LedgerInvariant("behind state without remote knowledge".into())
                    })?
                }
                (_, Some(version)) => version,
            }
        };

        // Materialize content outside the queue; bulk transfer is not a
        // ledger mutation.
        self.downloads.ensure_complete(path, target)?;

        // Commit under the queue, re-validating what the transfer window
        // may have changed.
        let _guard = shared.queues.lock(entity);
        let entry = shared.ledgers.require(path)?;
        if opts.remote_version.is_none() {
            match derive_state(&entry.ledger) {
                SyncState::Conflicting => return Err(SyncError::conflict(path)),
                SyncState::Synced => return Ok(()),
                _ => {}
            }
            if entry.ledger.remote_known_latest != Some(target) {
                return Err(SyncError::version_mismatch(format!(
                    "remote advanced past {target} during adoption"
                )));
            }
        }

        let old_listing = if entry.kind == EntityKind::Folder {
            entry
                .ledger
                .local_latest
                .and_then(|v| shared.store.read_listing(&ObjectId::local(entity, v)).ok())
        } else {
            None
        };

        self.materialize_local(entity, target)?;
        shared.ledgers.adopt_version(path, target)?;
        tracing::info!(%path, version = %target, "adopted remote version");

        match entry.kind {
            EntityKind::File => {
                shared
                    .bus
                    .publish(SyncEvent::FileChange { path: path.clone(), version: target });
            }
            EntityKind::Folder => {
                let new_listing = shared
                    .store
                    .read_listing(&ObjectId::local(entity, target))
                    .unwrap_or_default();
                self.publish_listing_delta(path, old_listing.as_ref(), &new_listing);
            }
        }
        Ok(())
    }

    /// Resolves one conflicting child name by importing the remote child,
    /// producing (and returning) a new local folder version.
    ///
    /// Used to cherry-pick from a folder diff without whole-folder
    /// adoption.
    pub fn adopt_remote_folder_item(
        &self,
        folder: &EntityPath,
        item_name: &str,
        opts: FolderItemOptions,
    ) -> SyncResult<Version> {
        let shared = &self.shared;
        let fentry = shared.ledgers.require(folder)?;
        if fentry.kind != EntityKind::Folder {
            return Err(SyncError::WrongKind { path: folder.clone(), expected: EntityKind::Folder });
        }
        let child_path = folder.child(item_name);

        let remote_folder_version = opts
            .remote_version
            .or(fentry.ledger.remote_known_latest)
            .ok_or_else(|| {
                SyncError::version_mismatch(format!("no remote version known for {folder}"))
            })?;
        let remote_listing =
            FolderListing::decode(&self.downloads.read_remote_all(folder, remote_folder_version)?)?;
        let remote_entry = remote_listing
            .get(item_name)
            .copied()
            .ok_or_else(|| SyncError::not_found(&child_path))?;

        // Identity overlap needs explicit consent before any mutation.
        let local_child = shared.ledgers.get(&child_path);
        let replacing = match &local_child {
            Some(existing) if existing.entity != remote_entry.entity => {
                if !opts.replace_local_item {
                    return Err(SyncError::conflict(&child_path));
                }
                true
            }
            _ => false,
        };

        shared.online.require_online()?;
        let child_version = shared
            .remote
            .probe_latest(&remote_entry.entity)?
            .ok_or_else(|| {
                SyncError::version_mismatch(format!(
                    "remote child {item_name} has no committed version"
                ))
            })?;
        self.downloads
            .ensure_complete_for(remote_entry.entity, &child_path, child_version)?;

        // Switch the child to the remote identity.
        {
            let _child_guard = shared.queues.lock(remote_entry.entity);
            if replacing {
                if let Some(existing) = shared.ledgers.get(&child_path) {
                    shared.ledgers.remove_subtree(&child_path);
                    shared.store.remove_entity(&existing.entity);
                }
            }
            shared
                .ledgers
                .ensure(&child_path, Some(remote_entry.entity), remote_entry.kind);
            self.materialize_local(remote_entry.entity, child_version)?;
            shared.ledgers.adopt_version(&child_path, child_version)?;
        }

        // Record the import in a new local folder version.
        let _guard = shared.queues.lock(fentry.entity);
        let fentry = shared.ledgers.require(folder)?;
        if let Some(expected) = opts.local_version {
            if fentry.ledger.local_latest != Some(expected) {
                return Err(SyncError::version_mismatch(format!(
                    "folder local latest is not {expected}"
                )));
            }
        }

        let mut listing = match fentry.ledger.local_latest {
            Some(v) => shared.store.read_listing(&ObjectId::local(fentry.entity, v))?,
            None => FolderListing::new(),
        };
        let was_present = listing.get(item_name).is_some();
        listing.insert(item_name, remote_entry);

        let new_version = shared.ledgers.record_local_write(folder)?;
        let bytes = listing.encode()?;
        let ctime = fentry
            .ledger
            .local_latest
            .and_then(|v| shared.store.meta(&ObjectId::local(fentry.entity, v)))
            .map_or_else(now_ms, |m| m.ctime_ms);
        shared.store.put_version(
            ObjectId::local(fentry.entity, new_version),
            &bytes,
            StoredMeta { len: bytes.len() as u64, mtime_ms: now_ms(), ctime_ms: ctime, attrs: Default::default() },
        )?;

        if replacing {
            shared.bus.publish(SyncEvent::EntryRemoval {
                path: folder.clone(),
                name: item_name.to_string(),
            });
        }
        if !was_present || replacing {
            shared.bus.publish(SyncEvent::EntryAddition {
                path: folder.clone(),
                name: item_name.to_string(),
            });
        }
        tracing::info!(%folder, item = item_name, version = %new_version, "adopted folder item");
        Ok(new_version)
    }

    /// Archives the current synced version.
    ///
    /// Requires state `synced` (only versions known to both sides may be
    /// archived) and fails `NotSynced` otherwise. Returns the archived
    /// version, which stays resolvable by number.
    pub fn archive_current(
        &self,
        path: &EntityPath,
        version: Option<Version>,
    ) -> SyncResult<Version> {
        let shared = &self.shared;
        let entity = shared.ledgers.require(path)?.entity;
        let _guard = shared.queues.lock(entity);

        let entry = shared.ledgers.require(path)?;
        if derive_state(&entry.ledger) != SyncState::Synced {
            return Err(SyncError::not_synced(path));
        }
        let current = entry
            .ledger
            .synced_latest
            .ok_or_else(|| SyncError::not_synced(path))?;
        let target = version.unwrap_or(current);

        shared.ledgers.archive_version(path, Branch::Synced, target)?;
        tracing::info!(%path, version = %target, "archived synced version");
        Ok(target)
    }

    /// Copies a fetched version from the cache realm into the local realm,
    /// discarding any colliding locally-authored content (a conflict
    /// adoption takes over the number). Common-lineage versions already in
    /// the local realm need no copy.
    fn materialize_local(
        &self,
        entity: coffer_core::EntityId,
        version: Version,
    ) -> SyncResult<()> {
        let store = &self.shared.store;
        let cache = ObjectId::cache(entity, version);
        let local = ObjectId::local(entity, version);

        if store.state(&cache) == coffer_store::OnDiskState::Complete {
            let bytes = store.read_all(&cache)?;
            let meta = store.meta(&cache).unwrap_or_default();
            store.remove_version(&local);
            store.put_version(local, &bytes, meta)?;
            Ok(())
        } else if store.state(&local) == coffer_store::OnDiskState::Complete {
            Ok(())
        } else {
            Err(SyncError::LedgerInvariant(format!(
                "adopted version {version} of {entity} is not materialized"
            )))
        }
    }

    fn publish_listing_delta(
        &self,
        path: &EntityPath,
        old: Option<&FolderListing>,
        new: &FolderListing,
    ) {
        let empty = FolderListing::new();
        let old = old.unwrap_or(&empty);
        for name in old.entries.keys() {
            if new.get(name).is_none() {
                self.shared.bus.publish(SyncEvent::EntryRemoval {
                    path: path.clone(),
                    name: name.clone(),
                });
            }
        }
        for name in new.entries.keys() {
            if old.get(name).is_none() {
                self.shared.bus.publish(SyncEvent::EntryAddition {
                    path: path.clone(),
                    name: name.clone(),
                });
            }
        }
    }
}
