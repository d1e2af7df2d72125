// crates/revolve-controller/src/error.rs
// ============================================================================
// Module: Revolve Controller Errors
// Description: Shared error type for the Learning Controller.
// Purpose: Wrap every dependency crate's error type behind one enum so the
// controller's own callers have a single `?` boundary.
// Dependencies: revolve-core, revolve-runtime, revolve-evolution,
// revolve-rollout, thiserror
// ============================================================================

//! ## Overview
//! Per the controller's "best-effort" contract (see [`crate::controller`]),
//! every step of `on_run_completed` catches its own [`ControllerError`] and
//! folds it into the returned outcome's audit trail rather than letting it
//! propagate to the run path. Administrative entry points (`start_canary`,
//! `rollback`, `reset_to_idle`) do propagate, since those are operator-
//! invoked and should fail loudly.

use revolve_core::CoreError;
use revolve_core::StoreError;
use revolve_evolution::EvolutionError;
use revolve_rollout::RolloutError;
use revolve_runtime::RuntimeError;

/// Errors raised while training a policy, checking a rollout, or
/// persisting controller bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The underlying artifact store failed.
    #[error("controller store failure: {0}")]
    Store(#[from] StoreError),

    /// A record failed a core invariant check.
    #[error("controller core invariant failure: {0}")]
    Core(#[from] CoreError),

    /// A record could not be serialized or deserialized.
    #[error("controller serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A per-run learning hook (signal collection, KPI aggregation,
    /// attribution) failed.
    #[error("controller runtime failure: {0}")]
    Runtime(#[from] RuntimeError),

    /// Candidate generation, shadow evaluation, or the A/B gate failed.
    #[error("controller evolution failure: {0}")]
    Evolution(#[from] EvolutionError),

    /// The rollout state machine rejected or failed an operation.
    #[error("controller rollout failure: {0}")]
    Rollout(#[from] RolloutError),

    /// Training was requested with no run examples available.
    #[error("no training examples available")]
    NoTrainingExamples,

    /// The controller was asked to train or check a rollout before any
    /// policy had ever been promoted to active.
    #[error("no active policy has been bootstrapped")]
    NoActivePolicy,
}
