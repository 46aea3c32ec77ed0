// crates/flotilla-core/src/core/hashing.rs
// ============================================================================
// Module: Flotilla Canonical Hashing
// Description: RFC 8785 JSON canonicalization and SHA-256 content digests.
// Purpose: Fingerprint configurations and snapshots for integrity checks.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Configurations are fingerprinted over their canonical (JCS) JSON form so
//! that two structurally equal documents always share a digest, regardless of
//! map ordering or whitespace. Durable stores keep the digest next to each
//! payload and refuse to load rows whose digest no longer matches.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Digest
// ============================================================================

/// Lowercase hex SHA-256 digest of a canonical payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Wraps an already hex-encoded digest (for example one read from disk).
    #[must_use]
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Errors raised when computing canonical digests.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Digests the canonical JSON form of a value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn digest_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<ContentDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(digest_bytes(&bytes))
}

/// Digests raw bytes.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentDigest(hex_encode(&hasher.finalize()))
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[usize::from(byte >> 4)] as char);
        out.push(HEX[usize::from(byte & 0x0f)] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use std::collections::BTreeMap;

    use super::digest_bytes;
    use super::digest_canonical_json;

    #[test]
    fn digest_is_independent_of_key_order() {
        let a = serde_json::json!({"b": 1, "a": [1, 2]});
        let b = serde_json::json!({"a": [1, 2], "b": 1});
        assert_eq!(digest_canonical_json(&a).unwrap(), digest_canonical_json(&b).unwrap());
    }

    #[test]
    fn digest_bytes_matches_known_vector() {
        let digest = digest_bytes(b"abc");
        assert_eq!(
            digest.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_changes_with_content() {
        let mut map = BTreeMap::new();
        map.insert("k", "v1");
        let first = digest_canonical_json(&map).unwrap();
        map.insert("k", "v2");
        assert_ne!(first, digest_canonical_json(&map).unwrap());
    }
}
