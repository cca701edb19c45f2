//! Sync status computation.
//!
//! Derives an entity's status from its ledger plus the cached or freshly
//! probed remote version. The derivation itself is pure (see
//! `coffer_core::derive_status`); this layer adds the optional server
//! probe, the parent-listing lookup, and the in-flight upload progress.

use crate::error::SyncResult;
use crate::shared::Shared;
use crate::upload::UploadOrchestrator;
use coffer_core::{
    derive_status, EntityKind, EntityPath, SyncEvent, SyncStatus, Version,
};
use coffer_store::ObjectId;
use std::sync::Arc;

/// Computes sync statuses on demand.
pub struct StatusComputer {
    shared: Arc<Shared>,
    uploads: Arc<UploadOrchestrator>,
}

impl StatusComputer {
    pub(crate) fn new(shared: Arc<Shared>, uploads: Arc<UploadOrchestrator>) -> Self {
        Self { shared, uploads }
    }

    /// Returns the entity's sync status.
    ///
    /// With `force_server_probe`, first refreshes the last-known remote
    /// version through the remote client, required once after an offline
    /// interval to learn of changes made while away. Without it, the
    /// cached value is used and may be stale.
    pub fn status(&self, path: &EntityPath, force_server_probe: bool) -> SyncResult<SyncStatus> {
        if force_server_probe {
            self.refresh_remote(path)?;
        } else {
            // Surface NotFound without touching the network.
            self.shared.ledgers.require(path)?;
        }

        let entry = self.shared.ledgers.require(path)?;
        let uploading = self.uploads.progress(&entry.entity);
        let exists_in_synced_parent = self.exists_in_synced_parent(path);
        Ok(derive_status(&entry.ledger, exists_in_synced_parent, uploading))
    }

    /// Refreshes the cached remote version without computing a status.
    ///
    /// Compatibility entry point for the earlier two-call protocol
    /// generation (`updateStatusInfo` then `status`); equivalent to the
    /// probe step of `status(path, true)`.
    pub fn update_status_info(&self, path: &EntityPath) -> SyncResult<()> {
        self.refresh_remote(path)
    }

    fn refresh_remote(&self, path: &EntityPath) -> SyncResult<()> {
        let entry = self.shared.ledgers.require(path)?;
        self.shared.online.require_online()?;
        if let Some(latest) = self.shared.remote.probe_latest(&entry.entity)? {
            if self.shared.ledgers.set_remote_latest(path, latest)? {
                self.shared.bus.publish(SyncEvent::RemoteChange {
                    path: path.clone(),
                    version: latest,
                });
                tracing::debug!(%path, version = %latest, "probe advanced remote knowledge");
            }
        }
        Ok(())
    }

    /// Whether the entity's name resolves inside its parent's synced
    /// listing, relevant immediately after creation, before the parent
    /// itself has been uploaded. `None` when no tracked parent folder
    /// exists.
    fn exists_in_synced_parent(&self, path: &EntityPath) -> Option<bool> {
        let parent = path.parent()?;
        let name = path.name()?;
        let entry = self.shared.ledgers.get(&parent)?;
        if entry.kind != EntityKind::Folder {
            return None;
        }
        let Some(synced) = entry.ledger.synced_latest else {
            return Some(false);
        };
        let listing = self
            .shared
            .store
            .read_listing(&ObjectId::local(entry.entity, synced))
            .ok()?;
        Some(listing.get(name).is_some())
    }

    /// Returns the last version the remote is known to hold, if any.
    #[must_use]
    pub fn remote_known_latest(&self, path: &EntityPath) -> Option<Version> {
        self.shared
            .ledgers
            .get(path)
            .and_then(|entry| entry.ledger.remote_known_latest)
    }
}
