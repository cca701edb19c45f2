//! Core type definitions for Coffer.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A version number within one entity's history.
///
/// Versions start at 1 on the first write, are strictly increasing, and are
/// never reused (even after archival), so stale references stay resolvable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(pub u64);

impl Version {
    /// The first version an entity can have.
    pub const FIRST: Version = Version(1);

    /// Creates a version from a raw number.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw version number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Identifier for an in-flight upload or download task.
///
/// Task IDs are allocated from one process-wide counter shared by both
/// orchestrators, so a task is unambiguous regardless of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Creates a task ID from a raw number.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// Unique identifier for an entity under sync.
///
/// Entity IDs are 128-bit UUIDs, stable across renames, and never reused.
/// They key the serialization queues, the object store, and remote refs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId([u8; 16]);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Creates an entity ID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.to_uuid())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

/// Whether an entity is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A regular file with byte content.
    File,
    /// A folder whose content is its listing of children.
    Folder,
}

/// One view of an entity's version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// The device-local branch, advanced by local writes.
    Local,
    /// The last-agreed branch, advanced by uploads and adoptions.
    Synced,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Local => write!(f, "local"),
            Branch::Synced => write!(f, "synced"),
        }
    }
}

/// A normalized absolute path identifying an entity.
///
/// Paths are `/`-separated with a leading slash and no trailing slash
/// (except the root itself). Construction normalizes repeated separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityPath(String);

impl EntityPath {
    /// Creates a normalized entity path.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut normalized = String::with_capacity(path.as_ref().len() + 1);
        for segment in path.as_ref().split('/').filter(|s| !s.is_empty()) {
            normalized.push('/');
            normalized.push_str(segment);
        }
        if normalized.is_empty() {
            normalized.push('/');
        }
        Self(normalized)
    }

    /// The root path.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<EntityPath> {
        if self.0 == "/" {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(EntityPath::root()),
            Some(idx) => Some(EntityPath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Returns the final path segment, or `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        if self.0 == "/" {
            return None;
        }
        self.0.rfind('/').map(|idx| &self.0[idx + 1..])
    }

    /// Returns the path of a child with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> EntityPath {
        if self.0 == "/" {
            EntityPath(format!("/{name}"))
        } else {
            EntityPath(format!("{}/{name}", self.0))
        }
    }

    /// Returns whether `other` is this path or a descendant of it.
    #[must_use]
    pub fn contains(&self, other: &EntityPath) -> bool {
        if self.0 == other.0 {
            return true;
        }
        if self.0 == "/" {
            return true;
        }
        other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/')
    }

    /// Returns how many segments below this path `other` sits.
    ///
    /// Returns `None` when `other` is not contained in this path.
    #[must_use]
    pub fn depth_to(&self, other: &EntityPath) -> Option<u32> {
        if !self.contains(other) {
            return None;
        }
        let suffix = &other.0[self.0.len()..];
        Some(suffix.split('/').filter(|s| !s.is_empty()).count() as u32)
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityPath {
    fn from(s: &str) -> Self {
        EntityPath::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_and_next() {
        let v1 = Version::FIRST;
        let v2 = v1.next();
        assert!(v1 < v2);
        assert_eq!(v2.as_u64(), 2);
        assert_eq!(format!("{v2}"), "v2");
    }

    #[test]
    fn entity_ids_are_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn path_normalization() {
        assert_eq!(EntityPath::new("//docs///notes.txt").as_str(), "/docs/notes.txt");
        assert_eq!(EntityPath::new("docs/notes.txt").as_str(), "/docs/notes.txt");
        assert_eq!(EntityPath::new("").as_str(), "/");
    }

    #[test]
    fn path_parent_and_name() {
        let p = EntityPath::new("/docs/notes.txt");
        assert_eq!(p.parent(), Some(EntityPath::new("/docs")));
        assert_eq!(p.name(), Some("notes.txt"));
        assert_eq!(EntityPath::new("/docs").parent(), Some(EntityPath::root()));
        assert_eq!(EntityPath::root().parent(), None);
        assert_eq!(EntityPath::root().name(), None);
    }

    #[test]
    fn path_containment_and_depth() {
        let root = EntityPath::new("/docs");
        let deep = EntityPath::new("/docs/a/b");
        assert!(root.contains(&deep));
        assert!(!root.contains(&EntityPath::new("/docsish/x")));
        assert_eq!(root.depth_to(&deep), Some(2));
        assert_eq!(root.depth_to(&root), Some(0));
        assert_eq!(root.depth_to(&EntityPath::new("/other")), None);
    }

    #[test]
    fn child_paths() {
        assert_eq!(EntityPath::root().child("a").as_str(), "/a");
        assert_eq!(EntityPath::new("/a").child("b").as_str(), "/a/b");
    }
}
