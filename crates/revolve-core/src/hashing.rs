// crates/revolve-core/src/hashing.rs
// ============================================================================
// Module: Revolve Hashing
// Description: Canonical JSON serialization and content hashing helpers.
// Purpose: Produce stable, reproducible inputs_hash values for replayable
// records.
// Dependencies: serde, serde_json, sha2
// ============================================================================

//! ## Overview
//! Every record whose replayability matters carries an `inputs_hash`: the
//! first 16 hex characters of a SHA-256 digest over a canonicalized JSON
//! serialization of its inputs. Canonicalization means keys sorted
//! lexicographically at every object level, which `serde_json`'s `Value`
//! already guarantees when backed by a `BTreeMap`-ordered map — this module
//! re-serializes through [`serde_json::Value`] to normalize field order
//! regardless of struct declaration order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors produced while canonicalizing or hashing a value.
#[derive(Debug, thiserror::Error)]
pub enum HashingError {
    /// The value could not be serialized to JSON.
    #[error("hashing serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// SECTION: Digest
// ============================================================================

/// A content digest with its algorithm label.
///
/// # Invariants
/// - `value` is lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashDigest {
    /// Algorithm label (currently always `"sha256"`).
    pub algorithm: &'static str,
    /// Lowercase hex digest value.
    pub value: String,
}

// ============================================================================
// SECTION: Canonicalization
// ============================================================================

/// Serializes `value` into canonical JSON bytes (sorted object keys).
///
/// # Errors
///
/// Returns [`HashingError`] when `value` cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashingError> {
    let as_value = serde_json::to_value(value)?;
    let canonical = canonicalize(as_value);
    Ok(serde_json::to_vec(&canonical)?)
}

/// Recursively sorts object keys so serialization order is deterministic.
fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, serde_json::Value> =
                std::collections::BTreeMap::new();
            for (key, nested) in map {
                sorted.insert(key, canonicalize(nested));
            }
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Hashes raw bytes with SHA-256, returning a lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> HashDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    HashDigest {
        algorithm: "sha256",
        value: hex_encode(&digest),
    }
}

/// Computes the first 16 hex characters of the SHA-256 digest of the
/// canonical JSON serialization of `value`, for use as an `inputs_hash`.
///
/// # Errors
///
/// Returns [`HashingError`] when `value` cannot be serialized.
pub fn inputs_hash<T: Serialize>(value: &T) -> Result<String, HashingError> {
    let bytes = canonical_json_bytes(value)?;
    let digest = hash_bytes(&bytes);
    Ok(digest.value.chars().take(16).collect())
}

/// Encodes bytes as lowercase hex without pulling in an extra dependency.
fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test-only helpers may panic on unexpected input"
)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        let bytes_a = canonical_json_bytes(&a).unwrap_or_default();
        let bytes_b = canonical_json_bytes(&b).unwrap_or_default();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn inputs_hash_is_deterministic() {
        let value = serde_json::json!({"x": 1, "y": [1, 2, 3]});
        let first = inputs_hash(&value).unwrap_or_default();
        let second = inputs_hash(&value).unwrap_or_default();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
    }
}
