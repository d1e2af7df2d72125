// crates/revolve-runtime/src/error.rs
// ============================================================================
// Module: Revolve Runtime Errors
// Description: Shared error type for the per-run learning hooks.
// Purpose: Let every hot-path caller catch one error type and swallow it per
// the "secondary side effects are shadow-only" contract.
// Dependencies: revolve-core, thiserror
// ============================================================================

//! ## Overview
//! Every function in this crate that can fail returns [`RuntimeError`]. The
//! Learning Controller is the only caller that acts on it directly; every
//! other caller on the hot path logs and discards it, per the run-path
//! isolation contract.

use revolve_core::CoreError;
use revolve_core::StoreError;
use revolve_core::hashing::HashingError;

/// Errors raised while collecting signals, updating working memory,
/// attributing outcomes, or aggregating KPIs.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The underlying artifact store failed.
    #[error("runtime store failure: {0}")]
    Store(#[from] StoreError),

    /// A record failed a core invariant check.
    #[error("runtime core invariant failure: {0}")]
    Core(#[from] CoreError),

    /// A value could not be hashed.
    #[error("runtime hashing failure: {0}")]
    Hashing(#[from] HashingError),

    /// A record could not be serialized or deserialized.
    #[error("runtime serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}
