// crates/revolve-controller/src/lib.rs
// ============================================================================
// Module: Revolve Controller
// Description: The Learning Controller (C15): training triggers, policy
// training, and the orchestration of shadow evaluation, the A/B gate, and
// rollout start/advance/rollback after every completed run.
// Dependencies: revolve-core, revolve-store, revolve-runtime,
// revolve-evolution, revolve-rollout, revolve-config
// ============================================================================

#![forbid(unsafe_code)]

pub mod controller;
pub mod error;
pub mod training;

pub use controller::LearningController;
pub use controller::LearningOutcome;
pub use error::ControllerError;
pub use training::PolicyRegistry;
pub use training::TrainingMetadata;
pub use training::train_policy;
