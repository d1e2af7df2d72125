// crates/revolve-core/src/policy.rs
// ============================================================================
// Module: Revolve Policy Model
// Description: Strategy genomes, candidate policies, released policies, and
// their rolling KPIs.
// Purpose: Give the Exploration Engine (C8), Learning Controller (C15), and
// Rollout Manager (C13) a shared, validated policy vocabulary.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Policy`] is the unit the Learning Controller trains and the Rollout
//! Manager promotes; it is never mutated once written, only superseded by a
//! later `policy_version`. A [`CandidatePolicy`] is a mutation of a parent
//! [`StrategyGenome`] awaiting evaluation; its [`CandidateStatus`] advances
//! monotonically from `generated` to a terminal state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::CandidateId;
use crate::identifiers::PlanId;
use crate::identifiers::PolicyId;
use crate::identifiers::PromptTemplateId;
use crate::identifiers::RetrievalPolicyId;
use crate::identifiers::ToolChainId;
use crate::signal::PlannerMode;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Strategy genome
// ============================================================================

/// The tunable parameters of one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyGenome {
    /// Retrieval policy this genome selects.
    pub retrieval_policy_id: RetrievalPolicyId,
    /// Prompt template this genome selects.
    pub prompt_template_id: PromptTemplateId,
    /// Tool-chain this genome selects.
    pub tool_chain_id: ToolChainId,
    /// Planner mode this genome runs under.
    pub planner_mode: PlannerMode,
    /// Number of documents to retrieve per query.
    pub top_k: u32,
    /// Per-tool timeout in milliseconds.
    pub tool_timeout_ms: u64,
}

// ============================================================================
// SECTION: Mutation operators
// ============================================================================

/// A named transformation applied to a parent genome to produce a
/// candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperator {
    /// Swaps the retrieval policy for another from the configured pool.
    RetrievalSwitch,
    /// Swaps the prompt template for another from the configured pool.
    PromptVariant,
    /// Swaps the tool-chain for another from the configured pool.
    ToolSwap,
    /// Perturbs `top_k` within a configured range.
    ParamPerturbTopK,
    /// Perturbs `tool_timeout_ms` within a configured range.
    ParamPerturbTimeout,
}

// ============================================================================
// SECTION: Candidate policy
// ============================================================================

/// The counts and gate thresholds a candidate will be evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPlan {
    /// Number of replay items the regression runner will execute.
    pub replay_count: u32,
    /// Gate thresholds keyed by check name (e.g., `"min_success_uplift"`).
    pub gate_thresholds: BTreeMap<String, f64>,
}

/// The lifecycle stage of a [`CandidatePolicy`].
///
/// # Invariants
/// - Transitions are monotone: `generated` -> `shadowing` -> (`rejected` |
///   `passed` -> `rolled_out`). A candidate never regresses to an earlier
///   status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// The candidate was produced by a mutation operator but not yet
    /// evaluated.
    Generated,
    /// The candidate is undergoing shadow execution and regression checks.
    Shadowing,
    /// The candidate failed regression or the A/B gate.
    Rejected,
    /// The candidate passed regression and the A/B gate.
    Passed,
    /// The candidate was promoted to active via rollout.
    RolledOut,
}

/// A policy generated from a parent genome via one or more mutation
/// operators, awaiting or undergoing evaluation.
///
/// # Invariants
/// - `inputs_hash` is computed over `(parent_id, genome, mutation_operators)`
///   so identical mutations from identical parents are detectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePolicy {
    /// Schema version of this record.
    pub schema_version: String,
    /// Unique identifier of this candidate.
    pub candidate_id: CandidateId,
    /// The genome this candidate was mutated from.
    pub parent_id: PolicyId,
    /// The candidate's own tunable parameters.
    pub genome: StrategyGenome,
    /// The mutation operators applied to produce this candidate.
    pub mutation_operators: Vec<MutationOperator>,
    /// Digest over the candidate's generating inputs, for replayability.
    pub inputs_hash: String,
    /// The evaluation this candidate will undergo.
    pub evaluation_plan: EvaluationPlan,
    /// The candidate's current lifecycle stage.
    pub status: CandidateStatus,
    /// When this candidate was generated.
    pub generated_at: Timestamp,
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Which plan to select, derived from training-time plan statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSelectionRules {
    /// The plan to prefer when no other signal overrides it.
    pub prefer_plan: PlanId,
    /// All observed plans ordered by descending success rate, with the
    /// default fallback ladder appended.
    pub fallback_order: Vec<PlanId>,
}

/// Cost, latency, and failure-rate ceilings a policy enforces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyThresholds {
    /// Maximum acceptable cost per run, in US dollars.
    pub max_cost_usd: f64,
    /// Maximum acceptable latency per run, in milliseconds.
    pub max_latency_ms: f64,
    /// Maximum acceptable failure rate, in `[0, 1]`.
    pub failure_rate_tolerance: f64,
}

/// Provenance and training statistics for a [`Policy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    /// Number of run examples used to train this policy.
    pub source_run_count: u64,
    /// Free-form training statistics (per-plan counts, percentiles, etc.).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub statistics: serde_json::Map<String, serde_json::Value>,
}

/// A released, versioned policy configuration.
///
/// # Invariants
/// - `policy_version` is monotonically increasing across a policy's
///   lineage.
/// - Never mutated once written; superseded only by a new `policy_version`.
/// - Becomes `active` only via the Rollout Manager, never by direct write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Schema version of this record.
    pub schema_version: String,
    /// Monotone version number for this policy lineage.
    pub policy_version: u64,
    /// Plan selection rules derived from training.
    pub plan_selection_rules: PlanSelectionRules,
    /// Cost, latency, and failure-rate ceilings.
    pub thresholds: PolicyThresholds,
    /// Provenance and training statistics.
    pub metadata: PolicyMetadata,
    /// When this policy was generated.
    pub generated_at: Timestamp,
}

impl Policy {
    /// The stable identifier derived from this policy's version.
    #[must_use]
    pub fn policy_id(&self) -> PolicyId {
        PolicyId::new(format!("policy-{}", self.policy_version))
    }
}

// ============================================================================
// SECTION: PolicyKPI
// ============================================================================

/// Rolling-window KPIs for one policy identifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyKpi {
    /// Number of runs contributing to this window.
    pub total_runs: u64,
    /// Rolling success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Rolling average cost in US dollars.
    pub avg_cost_usd: f64,
    /// Rolling p95 latency in milliseconds.
    pub p95_latency_ms: f64,
    /// Rolling failure rate in `[0, 1]`.
    pub failure_rate: f64,
    /// Rolling evidence pass rate in `[0, 1]`. See module docs on
    /// `revolve_runtime::kpi` for how this differs from a per-run evidence
    /// usage rate.
    pub evidence_pass_rate: f64,
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
    fn policy_id_is_derived_from_version() {
        let policy = Policy {
            schema_version: "1.0".to_string(),
            policy_version: 7,
            plan_selection_rules: PlanSelectionRules {
                prefer_plan: PlanId::new("normal"),
                fallback_order: vec![PlanId::new("normal")],
            },
            thresholds: PolicyThresholds {
                max_cost_usd: 1.0,
                max_latency_ms: 1000.0,
                failure_rate_tolerance: 0.2,
            },
            metadata: PolicyMetadata {
                source_run_count: 100,
                statistics: serde_json::Map::new(),
            },
            generated_at: Timestamp::now(),
        };
        assert_eq!(policy.policy_id().as_str(), "policy-7");
    }

    #[test]
    fn candidate_policy_round_trips_through_json() {
        let candidate = CandidatePolicy {
            schema_version: "1.0".to_string(),
            candidate_id: CandidateId::new("cand-1"),
            parent_id: PolicyId::new("policy-1"),
            genome: StrategyGenome {
                retrieval_policy_id: RetrievalPolicyId::new("r1"),
                prompt_template_id: PromptTemplateId::new("p1"),
                tool_chain_id: ToolChainId::new("t1"),
                planner_mode: PlannerMode::Normal,
                top_k: 5,
                tool_timeout_ms: 5000,
            },
            mutation_operators: vec![MutationOperator::RetrievalSwitch],
            inputs_hash: "abc123".to_string(),
            evaluation_plan: EvaluationPlan {
                replay_count: 100,
                gate_thresholds: BTreeMap::new(),
            },
            status: CandidateStatus::Generated,
            generated_at: Timestamp::now(),
        };
        let bytes = serde_json::to_vec(&candidate).expect("serialize");
        let restored: CandidatePolicy = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(candidate, restored);
    }
}
