//! # Coffer Core
//!
//! Version ledger, sync status model, and event bus for the Coffer sync
//! engine.
//!
//! This crate provides:
//! - Per-entity version ledgers across local/synced/remote branches
//! - Pure sync-status derivation (synced / unsynced / behind / conflicting)
//! - Folder listings and their CBOR codec
//! - Diff types for conflict inspection
//! - The per-entity multiplexed event bus
//!
//! It holds state and derivations only, no I/O. Orchestration lives in
//! `coffer_sync_engine`.
//!
//! ## Key Invariants
//!
//! - Version numbers start at 1, are strictly increasing, and are never
//!   reused, even after archival
//! - `local_latest` advances only through local mutation
//! - `synced_latest` advances only through upload or adoption
//! - Status is a pure function of ledger state
//! - Ledger mutations validate before applying; there is no partial apply

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod error;
mod event;
mod ledger;
mod listing;
mod status;
mod types;

pub use diff::{AttrChange, AttributeDiff, DiffOrigin, FileDiff, FolderDiff, NameOverlap, SideTimes};
pub use error::{LedgerError, LedgerResult};
pub use event::{EventBus, SyncEvent};
pub use ledger::{LedgerBook, LedgerEntry, VersionLedger, VersionList};
pub use listing::{FolderEntry, FolderListing, ListingError, ListingResult};
pub use status::{derive_state, derive_status, BranchView, SyncState, SyncStatus, UploadProgress};
pub use types::{Branch, EntityId, EntityKind, EntityPath, TaskId, Version};
