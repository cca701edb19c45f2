//! Sync status derivation.
//!
//! A [`SyncStatus`] is derived on demand from a [`VersionLedger`] plus the
//! cached (or freshly probed) remote version; it is never stored. The
//! derivation is a pure function of ledger state: computing it twice with no
//! intervening mutation yields identical results.

use crate::ledger::VersionLedger;
use crate::types::{TaskId, Version};

/// The sync state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Local and remote agree on the latest version.
    Synced,
    /// Only the local branch has diverged from the last common synced
    /// version.
    Unsynced,
    /// Only the remote branch has diverged.
    Behind,
    /// Both branches have independently diverged.
    Conflicting,
}

impl SyncState {
    /// Returns true if an upload could publish local changes.
    #[must_use]
    pub fn has_local_changes(&self) -> bool {
        matches!(self, SyncState::Unsynced | SyncState::Conflicting)
    }

    /// Returns true if an adoption could merge remote changes.
    #[must_use]
    pub fn has_remote_changes(&self) -> bool {
        matches!(self, SyncState::Behind | SyncState::Conflicting)
    }
}

/// One branch of an entity's status, as reported to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchView {
    /// Latest version of the branch, if any.
    pub latest: Option<Version>,
    /// Archived versions of the branch, ascending.
    pub archived: Vec<Version>,
    /// Whether the branch latest itself sits in the archived set.
    pub is_archived: bool,
}

impl BranchView {
    fn from_parts(latest: Option<Version>, archived: &std::collections::BTreeSet<Version>) -> Self {
        Self {
            latest,
            archived: archived.iter().copied().collect(),
            is_archived: latest.is_some_and(|v| archived.contains(&v)),
        }
    }
}

/// Progress of an in-flight upload task.
///
/// Present in [`SyncStatus::uploading`] exactly while the task is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// The task's identifier.
    pub task_id: TaskId,
    /// The version being published.
    pub version: Version,
    /// Total bytes to transmit.
    pub bytes_total: u64,
    /// Bytes transmitted so far.
    pub bytes_sent: u64,
}

/// The derived sync status of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// The derived state.
    pub state: SyncState,
    /// The local branch view.
    pub local: BranchView,
    /// The synced branch view.
    pub synced: BranchView,
    /// The remote branch view (latest only; remote archives are not
    /// mirrored locally).
    pub remote: BranchView,
    /// Whether the entity's name resolves inside its parent's synced
    /// listing. `None` when no tracked parent folder exists.
    pub exists_in_synced_parent: Option<bool>,
    /// Progress of the in-flight upload, if one exists.
    pub uploading: Option<UploadProgress>,
}

/// Derives the sync state from the three branch heads.
///
/// `-` (absent) on either side of a comparison counts as agreement with the
/// synced branch; a present head with no synced version counts as
/// divergence.
#[must_use]
pub fn derive_state(ledger: &VersionLedger) -> SyncState {
    match (ledger.local_diverged(), ledger.remote_diverged()) {
        (false, false) => SyncState::Synced,
        (false, true) => SyncState::Behind,
        (true, false) => SyncState::Unsynced,
        (true, true) => SyncState::Conflicting,
    }
}

/// Builds the full status view from a ledger.
///
/// `exists_in_synced_parent` and `uploading` come from the engine, which
/// owns the parent listings and the upload registry.
#[must_use]
pub fn derive_status(
    ledger: &VersionLedger,
    exists_in_synced_parent: Option<bool>,
    uploading: Option<UploadProgress>,
) -> SyncStatus {
    SyncStatus {
        state: derive_state(ledger),
        local: BranchView::from_parts(ledger.local_latest, &ledger.local_archived),
        synced: BranchView::from_parts(ledger.synced_latest, &ledger.synced_archived),
        remote: BranchView {
            latest: ledger.remote_known_latest,
            archived: Vec::new(),
            is_archived: false,
        },
        exists_in_synced_parent,
        uploading,
    }
}
