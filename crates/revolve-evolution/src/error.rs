// crates/revolve-evolution/src/error.rs
// ============================================================================
// Module: Revolve Evolution Errors
// Description: Shared error type for budget, exploration, shadow, regression
// and gate components.
// Purpose: One error type for every fallible operation in this crate.
// Dependencies: revolve-core, thiserror
// ============================================================================

//! ## Overview
//! As with `revolve-runtime`, every error here is something the Learning
//! Controller logs and records rather than propagates to the run path.

use revolve_core::CoreError;
use revolve_core::StoreError;
use revolve_core::hashing::HashingError;

/// Errors raised by the exploration and offline-evaluation components.
#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    /// The underlying artifact store failed.
    #[error("evolution store failure: {0}")]
    Store(#[from] StoreError),

    /// A record failed a core invariant check.
    #[error("evolution core invariant failure: {0}")]
    Core(#[from] CoreError),

    /// A value could not be hashed.
    #[error("evolution hashing failure: {0}")]
    Hashing(#[from] HashingError),

    /// A record could not be serialized or deserialized.
    #[error("evolution serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}
