//! Remote store client abstraction.
//!
//! The remote is an opaque get/put-version service: it holds committed,
//! immutable versions of entities and answers probes for the latest one.
//! This trait defines exactly the surface the sync engine consumes; wire
//! format, transport, and retry policy belong to implementations.

use crate::error::RemoteResult;
use bytes::Bytes;
use coffer_core::{EntityId, EntityKind, Version};
use std::collections::BTreeMap;

/// Metadata of one committed remote version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    /// The version described.
    pub version: Version,
    /// File or folder.
    pub kind: EntityKind,
    /// Length of the version's transmitted content in bytes.
    ///
    /// For a delta-encoded version this is the encoded patch length, not
    /// the reconstructed content length.
    pub total_len: u64,
    /// Modification time, milliseconds since the epoch.
    pub mtime_ms: u64,
    /// Creation time, milliseconds since the epoch.
    pub ctime_ms: u64,
    /// Application attributes of the version.
    pub attrs: BTreeMap<String, String>,
    /// For delta-encoded versions, the version the patch applies to.
    pub delta_base: Option<Version>,
}

/// Metadata supplied when opening a version for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMeta {
    /// File or folder.
    pub kind: EntityKind,
    /// Length of the content that will be pushed.
    pub total_len: u64,
    /// Modification time, milliseconds since the epoch.
    pub mtime_ms: u64,
    /// Creation time, milliseconds since the epoch.
    pub ctime_ms: u64,
    /// Application attributes of the version.
    pub attrs: BTreeMap<String, String>,
    /// Set when the pushed bytes are a delta against an earlier version.
    pub delta_base: Option<Version>,
}

/// Client for the remote version store.
///
/// All calls are synchronous; implementations own their timeouts. A
/// connectivity failure must surface as
/// [`RemoteError::Connectivity`](crate::RemoteError::Connectivity) rather
/// than blocking indefinitely.
pub trait RemoteClient: Send + Sync {
    /// Returns the latest committed version of an entity, or `None` when
    /// the remote does not hold one.
    fn probe_latest(&self, entity: &EntityId) -> RemoteResult<Option<Version>>;

    /// Returns the metadata of a committed version.
    fn stat(&self, entity: &EntityId, version: Version) -> RemoteResult<RemoteStat>;

    /// Fetches a byte range of a committed version's content.
    ///
    /// Short reads are not permitted: the returned buffer is exactly `len`
    /// bytes unless the range exceeds the content, which is an error.
    fn fetch_chunk(
        &self,
        entity: &EntityId,
        version: Version,
        offset: u64,
        len: u64,
    ) -> RemoteResult<Bytes>;

    /// Opens a new version for upload.
    ///
    /// Fails `VersionExists` when the number is already committed; this is
    /// the guard against clobbering a concurrent remote edit.
    fn begin_version(
        &self,
        entity: &EntityId,
        version: Version,
        meta: &VersionMeta,
    ) -> RemoteResult<()>;

    /// Pushes the next chunk of an open version at the given offset.
    fn push_chunk(
        &self,
        entity: &EntityId,
        version: Version,
        offset: u64,
        bytes: Bytes,
    ) -> RemoteResult<()>;

    /// Commits an open version, making it visible to probes and fetches.
    fn commit_version(&self, entity: &EntityId, version: Version) -> RemoteResult<()>;
}
