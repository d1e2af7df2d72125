// crates/revolve-rollout/src/error.rs
// ============================================================================
// Module: Revolve Rollout Errors
// Description: Shared error type for the policy router, rollout manager,
// and rollback manager.
// Purpose: One error type for every fallible operation in this crate.
// Dependencies: revolve-core, thiserror
// ============================================================================

//! ## Overview
//! As elsewhere in this workspace, these errors are local I/O or validation
//! failures; refusals driven by rollout state (e.g. "no rollout in
//! progress") are ordinary return values, not errors.

use revolve_core::CoreError;
use revolve_core::StoreError;

/// Errors raised by the policy router, rollout manager, and rollback
/// manager.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    /// The underlying artifact store failed.
    #[error("rollout store failure: {0}")]
    Store(#[from] StoreError),

    /// A record failed a core invariant check.
    #[error("rollout core invariant failure: {0}")]
    Core(#[from] CoreError),

    /// A record could not be serialized or deserialized.
    #[error("rollout serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The operation is refused given the current rollout stage.
    #[error("rollout refused in stage {stage}: {reason}")]
    Refused {
        /// The current stage that caused the refusal.
        stage: String,
        /// Why the operation was refused.
        reason: &'static str,
    },
}
