// crates/revolve-core/src/store.rs
// ============================================================================
// Module: Revolve Artifact Store Contract
// Description: The backend-agnostic trait every artifact-store
// implementation satisfies.
// Purpose: Let revolve-runtime, revolve-evolution, revolve-rollout, and
// revolve-controller depend on a storage abstraction instead of a concrete
// backend.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`ArtifactStore`] is implemented by `revolve_store::FsArtifactStore`
//! (see that crate) and by in-memory fakes used in tests elsewhere in this
//! workspace. Keys are hierarchical strings (e.g.
//! `"run_records/run-1.json"`); writes are atomic per key, reads are
//! lock-free, and absence is a distinguished `Ok(None)`, never an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors an [`ArtifactStore`] implementation may surface to its caller.
///
/// # Invariants
/// - A missing key is never represented as an error; see
///   [`ArtifactStore::get`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying filesystem or I/O layer failed.
    #[error("artifact store io failure on '{key}': {source}")]
    Io {
        /// The key being accessed when the failure occurred.
        key: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A value could not be serialized or deserialized.
    #[error("artifact store serialization failure on '{key}': {source}")]
    Serialize {
        /// The key being accessed when the failure occurred.
        key: String,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The requested write would exceed a configured size limit.
    #[error("artifact '{key}' exceeds size limit: max {max_bytes} bytes, got {actual_bytes}")]
    TooLarge {
        /// The key being written.
        key: String,
        /// The configured maximum size in bytes.
        max_bytes: usize,
        /// The actual size in bytes.
        actual_bytes: usize,
    },

    /// A stored record could not be parsed and was skipped rather than
    /// causing the reader to fail.
    #[error("artifact '{key}' is malformed and was skipped: {message}")]
    Malformed {
        /// The key whose contents were malformed.
        key: String,
        /// A human-readable description of the parse failure.
        message: String,
    },

    /// The key itself is not a valid hierarchical artifact key (e.g. it
    /// contains a parent-directory segment).
    #[error("invalid artifact key '{key}': {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why the key was rejected.
        reason: &'static str,
    },
}

// ============================================================================
// SECTION: ArtifactStore
// ============================================================================

/// The storage contract every component above C1 depends on.
///
/// # Invariants
/// - Writes are atomic per key: a reader never observes a partially written
///   value.
/// - `get` on an absent key returns `Ok(None)`, never an error.
/// - Previously written keys are never mutated or deleted by `put` or
///   `append`; compaction, if any, is an explicit out-of-band job.
pub trait ArtifactStore: Send + Sync {
    /// Atomically writes `bytes` under `key`, replacing any prior value,
    /// and returns the backend-specific path or locator the bytes were
    /// written to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying write fails.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError>;

    /// Reads the bytes stored under `key`, or `Ok(None)` if no value has
    /// ever been written there.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying read fails. A malformed
    /// value is the caller's concern, not this trait's: `get` returns raw
    /// bytes.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Appends `bytes` (typically one JSON line plus a trailing newline) to
    /// the log stored under `key`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying append fails.
    fn append(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Readiness probe: whether the store is currently able to serve reads
    /// and writes. Default implementation always reports ready.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store has detected it cannot currently
    /// serve requests.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Returns the current size in bytes of the value stored under `key`,
    /// or `Ok(None)` if no value has ever been written there. Lets a caller
    /// record a byte offset into a growing log without reading its
    /// contents. Default implementation falls back to a full `get`;
    /// backends that can `stat` a key cheaply should override this.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying read fails.
    fn len(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.get(key)?.map(|bytes| bytes.len() as u64))
    }

    /// Reads the bytes stored under `key` starting at `offset`, or
    /// `Ok(None)` if no value has ever been written there. `offset` values
    /// past the end of the value yield an empty result, not an error.
    /// Default implementation falls back to a full `get` plus slicing;
    /// backends that can seek should override this to avoid reading bytes
    /// the caller has already consumed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying read fails.
    fn get_from(&self, key: &str, offset: u64) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(key)?.map(|bytes| {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
            bytes[start..].to_vec()
        }))
    }
}
