//! Folder listings and their CBOR codec.
//!
//! A folder version's content bytes are its encoded listing: folder uploads
//! publish structure only. Entries carry the child's stable identity and
//! kind so another device can track the child before fetching it.

use crate::types::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for listing codec operations.
pub type ListingResult<T> = Result<T, ListingError>;

/// Errors from encoding or decoding a folder listing.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The listing could not be encoded.
    #[error("listing encode failed: {0}")]
    Encode(String),
    /// The bytes are not a valid listing.
    #[error("listing decode failed: {0}")]
    Decode(String),
}

/// One child entry in a folder listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    /// The child's stable identity.
    pub entity: EntityId,
    /// Whether the child is a file or a folder.
    pub kind: EntityKind,
}

/// The structure of a folder: child names mapped to identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderListing {
    /// Child entries keyed by name, sorted for deterministic encoding.
    pub entries: BTreeMap<String, FolderEntry>,
}

impl FolderListing {
    /// Creates an empty listing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for a child name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FolderEntry> {
        self.entries.get(name)
    }

    /// Inserts or replaces a child entry.
    pub fn insert(&mut self, name: impl Into<String>, entry: FolderEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// Removes a child entry, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<FolderEntry> {
        self.entries.remove(name)
    }

    /// Encodes the listing to CBOR bytes.
    pub fn encode(&self) -> ListingResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out).map_err(|e| ListingError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decodes a listing from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ListingResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ListingError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_listing() {
        let mut listing = FolderListing::new();
        listing.insert(
            "notes.txt",
            FolderEntry { entity: EntityId::new(), kind: EntityKind::File },
        );
        listing.insert(
            "photos",
            FolderEntry { entity: EntityId::new(), kind: EntityKind::Folder },
        );

        let bytes = listing.encode().unwrap();
        let decoded = FolderListing::decode(&bytes).unwrap();
        assert_eq!(decoded, listing);
    }

    #[test]
    fn garbage_bytes_fail_decode() {
        assert!(matches!(
            FolderListing::decode(&[0xff, 0x00, 0x13]),
            Err(ListingError::Decode(_))
        ));
    }

    #[test]
    fn deterministic_encoding() {
        let mut a = FolderListing::new();
        let mut b = FolderListing::new();
        let id = EntityId::new();
        let entry = FolderEntry { entity: id, kind: EntityKind::File };
        a.insert("x", entry);
        a.insert("y", entry);
        b.insert("y", entry);
        b.insert("x", entry);
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }
}
