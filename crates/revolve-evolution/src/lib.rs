// crates/revolve-evolution/src/lib.rs
// ============================================================================
// Module: Revolve Evolution
// Description: Candidate policy generation and offline evaluation: failure
// budget, exploration engine, shadow execution, golden replay/regression,
// and the A/B gate.
// Purpose: Implement C7 through C11. Everything here runs off the hot path,
// triggered by the Learning Controller or its own periodic tick.
// Dependencies: revolve-core, revolve-store, revolve-runtime
// ============================================================================

//! ## Overview
//! This crate owns every component between a completed run's attribution
//! and a candidate policy reaching (or failing to reach) the Rollout
//! Manager. Nothing here mutates `RolloutState`; that is `revolve-rollout`'s
//! exclusive responsibility.

pub mod budget;
pub mod error;
pub mod exploration;
pub mod gate;
pub mod regression;
pub mod shadow;

pub use budget::FailureBudget;
pub use error::EvolutionError;
pub use exploration::DiscoveryReward;
pub use exploration::ExplorationDecision;
pub use exploration::MutationPool;
pub use exploration::decide;
pub use exploration::evaluate_first_candidate;
pub use exploration::generate_candidates;
pub use gate::GateThresholds;
pub use gate::evaluate_gate;
pub use regression::GoldenBaseline;
pub use regression::RegressionThresholds;
pub use regression::ReplayInput;
pub use regression::ReplayOutcome;
pub use regression::ReplayRunner;
pub use regression::run_regression;
pub use shadow::ShadowRunOutcome;
pub use shadow::ShadowRunner;
pub use shadow::run_shadow;
pub use shadow::run_shadow_aggregate;
