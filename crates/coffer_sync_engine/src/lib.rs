//! # Coffer Sync Engine
//!
//! Sync state machine and transfer orchestration for Coffer, the personal
//! encrypted-storage platform.
//!
//! This crate provides:
//! - The per-entity version ledger surface (local / synced / remote
//!   branches) and status derivation
//! - Upload and download orchestration: chunked, resumable, single-flight
//!   per entity, with progress published on the event bus
//! - Conflict diffing for files and folders
//! - Adoption of remote state, whole-entity or per folder child
//! - Per-entity FIFO serialization and a process-wide connectivity gate
//!
//! ## Key Invariants
//!
//! - Version numbers are strictly increasing per entity and never reused
//! - `local_latest` advances only through local mutation; `synced_latest`
//!   only through a successful upload or an adoption
//! - Every ledger mutation runs inside the entity's FIFO queue; bulk byte
//!   transfer runs outside it
//! - The engine never auto-resolves a conflict and never silently retries
//!   a failed network call

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adopt;
mod config;
mod delta;
mod diff;
mod download;
mod engine;
mod error;
mod local;
mod online;
mod queue;
mod shared;
mod status;
mod upload;

pub use adopt::{AdoptOptions, AdoptionManager, FolderItemOptions};
pub use config::EngineConfig;
pub use delta::DeltaPatch;
pub use diff::DiffEngine;
pub use download::DownloadOrchestrator;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use local::{now_ms, LocalStore, StoredMeta};
pub use online::OnlineGate;
pub use queue::{EntityQueues, QueueGuard};
pub use shared::TaskCounter;
pub use status::StatusComputer;
pub use upload::{StartedUpload, UploadOptions, UploadOrchestrator};
