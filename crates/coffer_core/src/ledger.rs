//! Per-entity version bookkeeping across branches.
//!
//! Every entity under sync owns one [`VersionLedger`] recording the latest
//! and archived versions of its local and synced branches plus the last
//! version the remote is known to hold. The [`LedgerBook`] is the path-keyed
//! registry of ledgers, created on the first local write or the first
//! remote-knowledge event and destroyed when the entity (or its parent) is
//! deleted.

use crate::error::{LedgerError, LedgerResult};
use crate::types::{Branch, EntityId, EntityKind, EntityPath, Version};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Version counters and archived sets for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionLedger {
    /// Latest version of the local branch; advances only through local
    /// mutation.
    pub local_latest: Option<Version>,
    /// Archived versions of the local branch.
    pub local_archived: BTreeSet<Version>,
    /// Latest version of the synced branch; advances only through a
    /// successful upload or an adoption.
    pub synced_latest: Option<Version>,
    /// Archived versions of the synced branch.
    pub synced_archived: BTreeSet<Version>,
    /// Latest version the remote is known to hold (may be stale).
    pub remote_known_latest: Option<Version>,
}

impl VersionLedger {
    /// Returns the highest version number this ledger has ever seen.
    ///
    /// Allocation always goes past this, so numbers are never reused even
    /// after archival or a conflict re-label.
    #[must_use]
    pub fn highest_seen(&self) -> Option<Version> {
        [
            self.local_latest,
            self.synced_latest,
            self.remote_known_latest,
            self.local_archived.last().copied(),
            self.synced_archived.last().copied(),
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// Allocates the next version number for a local write.
    #[must_use]
    pub fn next_version(&self) -> Version {
        self.highest_seen().map_or(Version::FIRST, Version::next)
    }

    /// Returns whether the local branch has diverged from the synced branch.
    #[must_use]
    pub fn local_diverged(&self) -> bool {
        match (self.local_latest, self.synced_latest) {
            (Some(l), Some(s)) => l > s,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Returns whether the remote branch has diverged from the synced branch.
    #[must_use]
    pub fn remote_diverged(&self) -> bool {
        match (self.remote_known_latest, self.synced_latest) {
            (Some(r), Some(s)) => r > s,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn archived_mut(&mut self, branch: Branch) -> &mut BTreeSet<Version> {
        match branch {
            Branch::Local => &mut self.local_archived,
            Branch::Synced => &mut self.synced_archived,
        }
    }
}

/// One tracked entity: identity, kind, and its ledger.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Stable identity of the entity.
    pub entity: EntityId,
    /// File or folder.
    pub kind: EntityKind,
    /// The entity's version ledger.
    pub ledger: VersionLedger,
}

/// Current and archived versions of an entity, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionList {
    /// The current (local latest) version, if any write happened yet.
    pub current: Option<Version>,
    /// All archived versions across both branches, ascending.
    pub archived: Vec<Version>,
}

/// Path-keyed registry of entity ledgers.
///
/// The book itself is thread-safe; callers that need multi-step atomicity
/// (read-check-mutate) serialize through the engine's per-entity queues.
#[derive(Debug, Default)]
pub struct LedgerBook {
    entries: RwLock<HashMap<EntityPath, LedgerEntry>>,
}

impl LedgerBook {
    /// Creates an empty ledger book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for a path, if tracked.
    #[must_use]
    pub fn get(&self, path: &EntityPath) -> Option<LedgerEntry> {
        self.entries.read().get(path).cloned()
    }

    /// Returns the entry for a path or a not-found error.
    pub fn require(&self, path: &EntityPath) -> LedgerResult<LedgerEntry> {
        self.get(path).ok_or_else(|| LedgerError::not_found(path))
    }

    /// Returns whether a path is tracked.
    #[must_use]
    pub fn contains(&self, path: &EntityPath) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Returns the entity ID for a path, if tracked.
    #[must_use]
    pub fn entity_id(&self, path: &EntityPath) -> Option<EntityId> {
        self.entries.read().get(path).map(|e| e.entity)
    }

    /// Creates the entry for a path if absent and returns it.
    ///
    /// `entity` fixes the identity on creation; pass `None` to mint a fresh
    /// one (first local write) or `Some` to track a remotely-known identity.
    pub fn ensure(
        &self,
        path: &EntityPath,
        entity: Option<EntityId>,
        kind: EntityKind,
    ) -> LedgerEntry {
        let mut entries = self.entries.write();
        entries
            .entry(path.clone())
            .or_insert_with(|| LedgerEntry {
                entity: entity.unwrap_or_default(),
                kind,
                ledger: VersionLedger::default(),
            })
            .clone()
    }

    /// Runs a closure over a mutable entry, failing `NotFound` if untracked.
    pub fn with_entry_mut<T>(
        &self,
        path: &EntityPath,
        f: impl FnOnce(&mut LedgerEntry) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| LedgerError::not_found(path))?;
        f(entry)
    }

    /// Returns the current (local latest) version of an entity.
    pub fn current_version(&self, path: &EntityPath) -> LedgerResult<Option<Version>> {
        Ok(self.require(path)?.ledger.local_latest)
    }

    /// Records a local write, atomically advancing `local_latest`.
    ///
    /// Must run inside the entity's serialization queue.
    pub fn record_local_write(&self, path: &EntityPath) -> LedgerResult<Version> {
        self.with_entry_mut(path, |entry| {
            let next = entry.ledger.next_version();
            entry.ledger.local_latest = Some(next);
            tracing::debug!(%path, version = %next, "recorded local write");
            Ok(next)
        })
    }

    /// Records a successfully published version on the synced branch.
    ///
    /// Rejects regressions: the synced branch only moves forward.
    pub fn record_synced_version(&self, path: &EntityPath, version: Version) -> LedgerResult<()> {
        self.with_entry_mut(path, |entry| {
            if let Some(current) = entry.ledger.synced_latest {
                if version <= current {
                    return Err(LedgerError::VersionRegression {
                        path: path.clone(),
                        current,
                        attempted: version,
                    });
                }
            }
            entry.ledger.synced_latest = Some(version);
            tracing::debug!(%path, %version, "synced branch advanced");
            Ok(())
        })
    }

    /// Moves a version into the named branch's archived set.
    ///
    /// Fails `NotSynced` if `branch` is the synced branch and `version` is
    /// not the current synced latest. The version stays resolvable (and the
    /// branch latest stays in place, now flagged archived).
    pub fn archive_version(
        &self,
        path: &EntityPath,
        branch: Branch,
        version: Version,
    ) -> LedgerResult<()> {
        self.with_entry_mut(path, |entry| {
            if branch == Branch::Synced && entry.ledger.synced_latest != Some(version) {
                return Err(LedgerError::not_synced(path));
            }
            entry.ledger.archived_mut(branch).insert(version);
            Ok(())
        })
    }

    /// Lists the current and archived versions of an entity.
    pub fn list_versions(&self, path: &EntityPath) -> LedgerResult<VersionList> {
        let entry = self.require(path)?;
        let archived: BTreeSet<Version> = entry
            .ledger
            .local_archived
            .union(&entry.ledger.synced_archived)
            .copied()
            .collect();
        Ok(VersionList {
            current: entry.ledger.local_latest,
            archived: archived.into_iter().collect(),
        })
    }

    /// Re-labels the local head to a later version number.
    ///
    /// Used by conflict uploads, where the published version must exceed the
    /// remote's latest. The new number must be past everything seen.
    pub fn relabel_local_head(&self, path: &EntityPath, version: Version) -> LedgerResult<Version> {
        self.with_entry_mut(path, |entry| {
            let current = entry
                .ledger
                .local_latest
                .ok_or_else(|| LedgerError::not_found(path))?;
            if version <= entry.ledger.highest_seen().unwrap_or(Version(0)) {
                return Err(LedgerError::VersionRegression {
                    path: path.clone(),
                    current,
                    attempted: version,
                });
            }
            entry.ledger.local_latest = Some(version);
            Ok(current)
        })
    }

    /// Updates the last-known remote version from a probe or a server push.
    ///
    /// Stale probes are ignored: remote knowledge only moves forward.
    /// Returns whether the value changed.
    pub fn set_remote_latest(&self, path: &EntityPath, version: Version) -> LedgerResult<bool> {
        self.with_entry_mut(path, |entry| {
            if entry.ledger.remote_known_latest.is_some_and(|r| version <= r) {
                return Ok(false);
            }
            entry.ledger.remote_known_latest = Some(version);
            Ok(true)
        })
    }

    /// Clears the remote branch after an adoption.
    pub fn clear_remote(&self, path: &EntityPath) -> LedgerResult<()> {
        self.with_entry_mut(path, |entry| {
            entry.ledger.remote_known_latest = None;
            Ok(())
        })
    }

    /// Adopts a version onto both local and synced branches.
    ///
    /// Sets `local_latest = synced_latest = version` and clears the remote
    /// branch; the caller has already materialized the content.
    pub fn adopt_version(&self, path: &EntityPath, version: Version) -> LedgerResult<()> {
        self.with_entry_mut(path, |entry| {
            entry.ledger.local_latest = Some(version);
            entry.ledger.synced_latest = Some(version);
            entry.ledger.remote_known_latest = None;
            Ok(())
        })
    }

    /// Removes the entity at `path` and every descendant.
    ///
    /// Returns the removed entries, parents before children.
    pub fn remove_subtree(&self, path: &EntityPath) -> Vec<(EntityPath, LedgerEntry)> {
        let mut entries = self.entries.write();
        let doomed: Vec<EntityPath> = entries
            .keys()
            .filter(|p| path.contains(p))
            .cloned()
            .collect();
        let mut removed: Vec<(EntityPath, LedgerEntry)> = doomed
            .into_iter()
            .filter_map(|p| entries.remove(&p).map(|e| (p, e)))
            .collect();
        removed.sort_by(|(a, _), (b, _)| a.cmp(b));
        removed
    }

    /// Re-keys the entity at `from` and every descendant under `to`.
    ///
    /// Entity identities and ledgers are untouched; renames are purely a
    /// path-mapping change.
    pub fn rename_subtree(&self, from: &EntityPath, to: &EntityPath) -> LedgerResult<()> {
        let mut entries = self.entries.write();
        if !entries.contains_key(from) {
            return Err(LedgerError::not_found(from));
        }
        let moved: Vec<EntityPath> = entries
            .keys()
            .filter(|p| from.contains(p))
            .cloned()
            .collect();
        for old_path in moved {
            if let Some(entry) = entries.remove(&old_path) {
                let suffix = &old_path.as_str()[from.as_str().len()..];
                let new_path = EntityPath::new(format!("{}{suffix}", to.as_str()));
                entries.insert(new_path, entry);
            }
        }
        Ok(())
    }

    /// Returns all tracked paths, ascending.
    #[must_use]
    pub fn paths(&self) -> Vec<EntityPath> {
        let mut paths: Vec<EntityPath> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}
