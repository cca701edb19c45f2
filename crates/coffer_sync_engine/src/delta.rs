//! Delta transmission encoding.
//!
//! Uploads may transmit a patch against the synced ancestor instead of full
//! content. The encoding is a common prefix/suffix trim: the patch carries
//! the lengths of the unchanged prefix and suffix plus the replacement
//! bytes in between. Any encoding that reconstructs byte-identical content
//! would be valid; this one is chosen for being cheap to compute and to
//! verify.

use crate::error::{SyncError, SyncResult};
use coffer_core::Version;
use serde::{Deserialize, Serialize};

/// A patch transforming one version's content into another's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPatch {
    /// The version the patch applies to.
    pub base: Version,
    /// Bytes shared with the base at the front.
    pub prefix_len: u64,
    /// Bytes shared with the base at the back.
    pub suffix_len: u64,
    /// Replacement bytes between prefix and suffix.
    pub replacement: Vec<u8>,
}

impl DeltaPatch {
    /// Computes the patch turning `old` into `new`.
    #[must_use]
    pub fn compute(base: Version, old: &[u8], new: &[u8]) -> Self {
        let limit = old.len().min(new.len());
        let prefix_len = old
            .iter()
            .zip(new.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let suffix_limit = limit - prefix_len;
        let suffix_len = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(suffix_limit)
            .take_while(|(a, b)| a == b)
            .count();

        Self {
            base,
            prefix_len: prefix_len as u64,
            suffix_len: suffix_len as u64,
            replacement: new[prefix_len..new.len() - suffix_len].to_vec(),
        }
    }

    /// Applies the patch to the base content, reconstructing the new
    /// content byte-identically.
    pub fn apply(&self, base: &[u8]) -> SyncResult<Vec<u8>> {
        let prefix = self.prefix_len as usize;
        let suffix = self.suffix_len as usize;
        if prefix + suffix > base.len() {
            return Err(SyncError::DeltaMismatch {
                message: format!(
                    "prefix {prefix} + suffix {suffix} exceed base of {} bytes",
                    base.len()
                ),
            });
        }

        let mut out = Vec::with_capacity(prefix + self.replacement.len() + suffix);
        out.extend_from_slice(&base[..prefix]);
        out.extend_from_slice(&self.replacement);
        out.extend_from_slice(&base[base.len() - suffix..]);
        Ok(out)
    }

    /// Encodes the patch for transmission.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| SyncError::DeltaMismatch { message: format!("encode failed: {e}") })?;
        Ok(out)
    }

    /// Decodes a transmitted patch.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| SyncError::DeltaMismatch { message: format!("decode failed: {e}") })
    }
}
