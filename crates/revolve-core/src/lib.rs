// crates/revolve-core/src/lib.rs
// ============================================================================
// Module: Revolve Core
// Description: Canonical data model, identifiers, hashing, and storage
// interfaces shared by every policy evolution crate.
// Purpose: Provide the stable, backend-agnostic contract surfaces consumed by
// revolve-store, revolve-runtime, revolve-evolution, revolve-rollout, and
// revolve-controller.
// Dependencies: serde, serde_json, sha2, thiserror, time
// ============================================================================

//! ## Overview
//! `revolve-core` defines every record the policy evolution loop reads or
//! writes, plus the identifiers, hashing, and timestamp primitives those
//! records are built from. It defines no I/O itself; [`ArtifactStore`] and
//! friends are traits implemented downstream (see `revolve-store`).
//!
//! All records are immutable once constructed and round-trip through
//! `serde_json` without loss. Every top-level record carries a
//! `schema_version` field so on-disk layout can evolve without breaking older
//! readers.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod attribution;
pub mod budget;
pub mod error;
pub mod event;
pub mod eval;
pub mod hashing;
pub mod identifiers;
pub mod pattern;
pub mod policy;
pub mod rollout;
pub mod run;
pub mod signal;
pub mod store;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use attribution::Attribution;
pub use attribution::FailureCause;
pub use budget::FailureBudgetState;
pub use error::CoreError;
pub use event::Event;
pub use event::EventPayload;
pub use event::EventType;
pub use eval::AggregateKpis;
pub use eval::GateCheck;
pub use eval::GateDecision;
pub use eval::RegressionVerdict;
pub use eval::ShadowEvalReport;
pub use eval::ShadowResult;
pub use hashing::HashDigest;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use hashing::inputs_hash;
pub use identifiers::CandidateId;
pub use identifiers::PatternKey;
pub use identifiers::PolicyId;
pub use identifiers::RunId;
pub use pattern::PatternEntry;
pub use pattern::PatternSignature;
pub use policy::CandidatePolicy;
pub use policy::CandidateStatus;
pub use policy::Policy;
pub use policy::PolicyKpi;
pub use policy::StrategyGenome;
pub use rollout::RolloutStage;
pub use rollout::RolloutState;
pub use run::CostSummary;
pub use run::FinalState;
pub use run::PlanPathType;
pub use run::RunRecord;
pub use signal::RunSignal;
pub use store::ArtifactStore;
pub use store::StoreError;
pub use time::Timestamp;
