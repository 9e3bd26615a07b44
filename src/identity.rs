//! Content-addressed identity for transformation artifacts.
//!
//! The artifact name composes the readable shard/turn/speaker coordinates with
//! a truncated digest of the payload and the transform's parameter
//! fingerprint. The digest makes re-runs idempotent: an unchanged unit maps to
//! the same name, so its artifact is found on disk and the transform is never
//! re-invoked. A changed payload (or changed transform parameters) yields a
//! fresh name and a fresh artifact.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the payload digest.
const HASH_PREFIX_LEN: usize = 12;

/// Stable identity of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId {
    /// Truncated hex digest of payload bytes + transform fingerprint
    hash_prefix: String,

    /// Full composed identifier, used as the artifact file stem
    composed: String,
}

impl ContentId {
    /// Derive the identity for one work unit.
    ///
    /// `fingerprint` is the transform's determinism-relevant parameter string;
    /// two transforms with different fingerprints never share artifacts.
    pub fn derive(
        payload: &str,
        fingerprint: &str,
        shard_id: &str,
        sequence_index: usize,
        tag: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_bytes());
        let digest = hasher.finalize();

        let mut hash_prefix = String::with_capacity(HASH_PREFIX_LEN);
        for byte in digest.iter().take(HASH_PREFIX_LEN / 2) {
            use std::fmt::Write as _;
            let _ = write!(&mut hash_prefix, "{:02x}", byte);
        }

        let composed = format!(
            "{}_turn_{}_{}_{}",
            sanitize(shard_id),
            sequence_index,
            sanitize(tag),
            hash_prefix
        );

        Self {
            hash_prefix,
            composed,
        }
    }

    /// The truncated payload digest.
    pub fn hash_prefix(&self) -> &str {
        &self.hash_prefix
    }

    /// File stem for the artifact on durable storage.
    pub fn file_stem(&self) -> &str {
        &self.composed
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.composed)
    }
}

/// Replace path-hostile characters so the composed id is a safe file stem.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
