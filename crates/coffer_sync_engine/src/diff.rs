//! Diff computation between local and remote versions.
//!
//! Exposes the information a caller needs to choose a conflict resolution;
//! never chooses one itself. Remote bytes and listings needed for a
//! comparison are fetched implicitly through the download registry.

use crate::download::DownloadOrchestrator;
use crate::error::{SyncError, SyncResult};
use crate::local::StoredMeta;
use crate::shared::Shared;
use coffer_core::{
    derive_state, AttrChange, AttributeDiff, DiffOrigin, EntityKind, EntityPath, FileDiff,
    FolderDiff, FolderListing, NameOverlap, SideTimes, SyncState, Version,
};
use coffer_store::{content_hash, ObjectId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Computes file and folder diffs for conflict inspection.
pub struct DiffEngine {
    shared: Arc<Shared>,
    downloads: Arc<DownloadOrchestrator>,
}

impl DiffEngine {
    pub(crate) fn new(shared: Arc<Shared>, downloads: Arc<DownloadOrchestrator>) -> Self {
        Self { shared, downloads }
    }

    /// Diffs the current local file version against a remote version
    /// (default: the last known remote latest).
    ///
    /// Returns `None` when there is no divergence to show. Equal mtimes are
    /// trusted as equal content unless `compare_content_if_same_mtime`
    /// forces a real comparison.
    pub fn diff_file_versions(
        &self,
        path: &EntityPath,
        remote_version: Option<Version>,
        compare_content_if_same_mtime: bool,
    ) -> SyncResult<Option<FileDiff>> {
        let entry = self.shared.ledgers.require(path)?;
        if entry.kind != EntityKind::File {
            return Err(SyncError::WrongKind { path: path.clone(), expected: EntityKind::File });
        }

        let Some((local, remote)) = self.comparable_versions(path, remote_version)? else {
            return Ok(None);
        };

        let local_oid = ObjectId::local(entry.entity, local);
        let local_meta = self
            .shared
            .store
            .meta(&local_oid)
            .ok_or_else(|| SyncError::LedgerInvariant(format!("no metadata for {local_oid}")))?;
        let remote_meta = self.downloads.version_meta(path, remote)?;

        let contents_same = if local_meta.mtime_ms == remote_meta.mtime_ms
            && !compare_content_if_same_mtime
        {
            true
        } else {
            let local_bytes = self.shared.store.read_all(&local_oid)?;
            let remote_bytes = self.downloads.read_remote_all(path, remote)?;
            content_hash(&local_bytes) == content_hash(&remote_bytes)
        };

        let common = entry.ledger.synced_latest;
        let common_meta =
            common.and_then(|v| self.shared.store.meta(&ObjectId::local(entry.entity, v)));
        let base_attrs = common_meta.as_ref().map(|m| &m.attrs);

        Ok(Some(FileDiff {
            local_version: local,
            remote_version: remote,
            common_version: common,
            contents_same,
            local_len: local_meta.len,
            remote_len: remote_meta.len,
            local_times: times(&local_meta),
            remote_times: times(&remote_meta),
            common_mtime_ms: common_meta.as_ref().map(|m| m.mtime_ms),
            attributes: diff_attributes(base_attrs, &local_meta.attrs, &remote_meta.attrs),
        }))
    }

    /// Diffs the current local folder listing against a remote one.
    ///
    /// `name_overlaps` is exactly the set of children requiring per-item
    /// adoption: names bound to different identities on the two sides.
    pub fn diff_folder_versions(
        &self,
        path: &EntityPath,
        remote_version: Option<Version>,
    ) -> SyncResult<Option<FolderDiff>> {
        let entry = self.shared.ledgers.require(path)?;
        if entry.kind != EntityKind::Folder {
            return Err(SyncError::WrongKind { path: path.clone(), expected: EntityKind::Folder });
        }

        let Some((local, remote)) = self.comparable_versions(path, remote_version)? else {
            return Ok(None);
        };

        let local_oid = ObjectId::local(entry.entity, local);
        let local_meta = self.shared.store.meta(&local_oid).unwrap_or_default();
        let local_listing = self.shared.store.read_listing(&local_oid)?;

        let remote_meta = self.downloads.version_meta(path, remote)?;
        let remote_bytes = self.downloads.read_remote_all(path, remote)?;
        let remote_listing = FolderListing::decode(&remote_bytes)?;

        let mut in_current = Vec::new();
        let mut name_overlaps = Vec::new();
        for (name, local_entry) in &local_listing.entries {
            match remote_listing.get(name) {
                None => in_current.push(name.clone()),
                Some(remote_entry) if remote_entry.entity != local_entry.entity => {
                    name_overlaps.push(NameOverlap {
                        name: name.clone(),
                        local_entity: local_entry.entity,
                        remote_entity: remote_entry.entity,
                    });
                }
                Some(_) => {}
            }
        }
        let in_remote: Vec<String> = remote_listing
            .entries
            .keys()
            .filter(|name| local_listing.get(name).is_none())
            .cloned()
            .collect();

        let common = entry.ledger.synced_latest;
        let common_meta =
            common.and_then(|v| self.shared.store.meta(&ObjectId::local(entry.entity, v)));

        Ok(Some(FolderDiff {
            local_version: local,
            remote_version: remote,
            common_version: common,
            in_current,
            in_remote,
            name_overlaps,
            local_times: times(&local_meta),
            remote_times: times(&remote_meta),
            common_mtime_ms: common_meta.as_ref().map(|m| m.mtime_ms),
        }))
    }

    /// The (local, remote) version pair to compare, or `None` when there is
    /// no divergence to show: no local content, no remote knowledge, or a
    /// synced entity with no other version explicitly asked for.
    ///
    /// Equal numbers are NOT shortcut to "same": divergent replicas can
    /// mint the same number for different content, which is exactly the
    /// case a conflict diff must show.
    fn comparable_versions(
        &self,
        path: &EntityPath,
        remote_version: Option<Version>,
    ) -> SyncResult<Option<(Version, Version)>> {
        let entry = self.shared.ledgers.require(path)?;
        let Some(local) = entry.ledger.local_latest else {
            return Ok(None);
        };
        let Some(remote) = remote_version.or(entry.ledger.remote_known_latest) else {
            return Ok(None);
        };
        if derive_state(&entry.ledger) == SyncState::Synced
            && remote_version.map_or(true, |v| Some(v) == entry.ledger.synced_latest)
        {
            return Ok(None);
        }
        Ok(Some((local, remote)))
    }
}

fn times(meta: &StoredMeta) -> SideTimes {
    SideTimes { ctime_ms: meta.ctime_ms, mtime_ms: meta.mtime_ms }
}

/// Tags every attribute change relative to the last common synced
/// version's attributes. Without a base, both sides are compared directly
/// as if the base were empty.
fn diff_attributes(
    base: Option<&BTreeMap<String, String>>,
    local: &BTreeMap<String, String>,
    remote: &BTreeMap<String, String>,
) -> Vec<AttributeDiff> {
    let empty = BTreeMap::new();
    let base = base.unwrap_or(&empty);

    let mut keys: Vec<&String> = base.keys().chain(local.keys()).chain(remote.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut out = Vec::new();
    for key in keys {
        let b = base.get(key);
        let l = local.get(key);
        let r = remote.get(key);
        let mut push = |change, origin| {
            out.push(AttributeDiff { key: key.clone(), change, origin });
        };

        match (b, l, r) {
            (None, Some(_), None) => push(AttrChange::Added, DiffOrigin::Local),
            (None, None, Some(_)) => push(AttrChange::Added, DiffOrigin::Remote),
            (None, Some(lv), Some(rv)) => {
                if lv != rv {
                    push(AttrChange::Added, DiffOrigin::Both);
                }
            }
            (Some(_), None, None) => push(AttrChange::Removed, DiffOrigin::Both),
            (Some(bv), Some(lv), None) => {
                if lv != bv {
                    push(AttrChange::Changed, DiffOrigin::Local);
                }
                push(AttrChange::Removed, DiffOrigin::Remote);
            }
            (Some(bv), None, Some(rv)) => {
                push(AttrChange::Removed, DiffOrigin::Local);
                if rv != bv {
                    push(AttrChange::Changed, DiffOrigin::Remote);
                }
            }
            (Some(bv), Some(lv), Some(rv)) => match (lv != bv, rv != bv) {
                (true, true) => push(AttrChange::Changed, DiffOrigin::Both),
                (true, false) => push(AttrChange::Changed, DiffOrigin::Local),
                (false, true) => push(AttrChange::Changed, DiffOrigin::Remote),
                (false, false) => {}
            },
            (None, None, None) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn attribute_tags_against_base() {
        let base = attrs(&[("color", "red"), ("shared", "yes"), ("gone", "soon")]);
        let local = attrs(&[("color", "blue"), ("shared", "yes"), ("gone", "soon"), ("mine", "1")]);
        let remote = attrs(&[("color", "red"), ("shared", "no"), ("theirs", "2")]);

        let diffs = diff_attributes(Some(&base), &local, &remote);

        let find = |key: &str| -> Vec<&AttributeDiff> {
            diffs.iter().filter(|d| d.key == key).collect()
        };

        assert_eq!(find("color")[0].change, AttrChange::Changed);
        assert_eq!(find("color")[0].origin, DiffOrigin::Local);
        assert_eq!(find("shared")[0].change, AttrChange::Changed);
        assert_eq!(find("shared")[0].origin, DiffOrigin::Remote);
        assert_eq!(find("gone")[0].change, AttrChange::Removed);
        assert_eq!(find("gone")[0].origin, DiffOrigin::Remote);
        assert_eq!(find("mine")[0].origin, DiffOrigin::Local);
        assert_eq!(find("theirs")[0].origin, DiffOrigin::Remote);
    }

    #[test]
    fn unchanged_attributes_produce_no_tags() {
        let base = attrs(&[("k", "v")]);
        let diffs = diff_attributes(Some(&base), &base.clone(), &base.clone());
        assert!(diffs.is_empty());
    }

    #[test]
    fn no_base_compares_directly() {
        let local = attrs(&[("a", "1"), ("same", "x")]);
        let remote = attrs(&[("b", "2"), ("same", "x")]);

        let diffs = diff_attributes(None, &local, &remote);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.change == AttrChange::Added));
    }

    #[test]
    fn both_removed_is_tagged_once() {
        let base = attrs(&[("k", "v")]);
        let none = BTreeMap::new();
        let diffs = diff_attributes(Some(&base), &none, &none);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].origin, DiffOrigin::Both);
    }
}
