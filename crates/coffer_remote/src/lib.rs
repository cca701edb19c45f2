//! # Coffer Remote
//!
//! Remote store client abstraction for the Coffer sync engine.
//!
//! This crate provides:
//! - The [`RemoteClient`] trait: probe / stat / fetch / push against an
//!   opaque remote version store
//! - [`MemoryRemote`], an in-memory remote that doubles as a loopback
//!   server for multi-device tests, with offline and fetch-failure
//!   injection
//! - The remote error taxonomy, with connectivity failures kept
//!   distinguishable so the engine can gate on them
//!
//! Committed versions are immutable and strictly increasing per entity;
//! an open upload is invisible until committed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod memory;

pub use client::{RemoteClient, RemoteStat, VersionMeta};
pub use error::{RemoteError, RemoteResult};
pub use memory::MemoryRemote;
