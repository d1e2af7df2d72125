// crates/revolve-core/src/signal.rs
// ============================================================================
// Module: Revolve Run Signal
// Description: The flattened, stable-contract view of a run used by every
// downstream learning component.
// Purpose: Decouple attribution, KPI aggregation, and exploration from the
// internal layout of RunRecord, which may change independently.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`RunSignal`] is produced once per run by the Signal Collector and is
//! the only input the Decision Attributor, KPI Aggregator, and Exploration
//! Engine read. Construction is deterministic: identical `RunRecord` and
//! event inputs always flatten to a byte-identical `RunSignal`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::PatternKey;
use crate::identifiers::PlanId;
use crate::identifiers::PolicyId;
use crate::identifiers::PromptTemplateId;
use crate::identifiers::RetrievalPolicyId;
use crate::identifiers::RunId;
use crate::run::PlanPathType;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Planner mode
// ============================================================================

/// The mode the planner actually ran in for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerMode {
    /// The planner ran its primary strategy.
    Normal,
    /// The planner fell back to a degraded strategy.
    Degraded,
    /// The planner fell back to a minimal strategy.
    Minimal,
    /// The planner used an explicit fallback strategy after a failure.
    Fallback,
}

impl PlannerMode {
    /// Whether this mode counts as evidence of planner trouble for
    /// attribution purposes.
    #[must_use]
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded | Self::Minimal | Self::Fallback)
    }
}

// ============================================================================
// SECTION: RunSignal
// ============================================================================

/// The stable, flattened view of a run, derived from its `RunRecord` and
/// event log.
///
/// # Invariants
/// - Deterministic: identical `RunRecord` plus event log inputs always
///   flatten to a byte-identical `RunSignal` (modulo `generated_at`).
/// - This is the contract downstream consumers read; `RunRecord`'s internal
///   layout may evolve independently of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSignal {
    /// Schema version of this record.
    pub schema_version: String,
    /// The run this signal was derived from.
    pub run_id: RunId,
    /// The policy that governed the run.
    pub policy_id: PolicyId,
    /// The plan selected for the run.
    pub plan_id: PlanId,
    /// Which path the plan took.
    pub plan_path_type: PlanPathType,
    /// The execution pattern this run belongs to, when classifiable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_key: Option<PatternKey>,
    /// Whether this is the first time this pattern has been observed.
    pub pattern_is_new: bool,
    /// Historical success rate of this pattern prior to this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_historical_success_rate: Option<f64>,
    /// Whether the run was considered successful overall.
    pub run_success: bool,
    /// Total cost of the run in US dollars.
    pub cost_usd: f64,
    /// Total wall-clock latency of the run in milliseconds.
    pub latency_ms: u64,
    /// Fraction of tool calls that succeeded.
    pub tool_success_rate: f64,
    /// Distinct failure types observed among tool calls.
    pub tool_failure_types: Vec<String>,
    /// The retrieval policy used, when retrieval occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_policy_id: Option<RetrievalPolicyId>,
    /// Number of documents retrieved.
    pub num_docs: u32,
    /// Fraction of retrieved documents actually used.
    pub evidence_usage_rate: f64,
    /// Historical success rate of the retrieval policy prior to this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_policy_historical_success_rate: Option<f64>,
    /// The prompt template used, when generation occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template_id: Option<PromptTemplateId>,
    /// Historical success rate of the prompt template prior to this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template_historical_success_rate: Option<f64>,
    /// Generation latency in milliseconds, when generation occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_latency_ms: Option<u64>,
    /// Generation cost in US dollars, when generation occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_cost_usd: Option<f64>,
    /// The mode the planner ran in.
    pub planner_mode: PlannerMode,
    /// Whether the planner's execution path contained a retry.
    pub planner_path_contains_retry: bool,
    /// When this signal was generated.
    pub generated_at: Timestamp,
    /// Forward-compatible extension bag.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
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

    fn sample_signal() -> RunSignal {
        RunSignal {
            schema_version: "1.0".to_string(),
            run_id: RunId::new("run-1"),
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new("plan-1"),
            plan_path_type: PlanPathType::Normal,
            pattern_key: Some(PatternKey::new("abc123")),
            pattern_is_new: false,
            pattern_historical_success_rate: Some(0.4),
            run_success: false,
            cost_usd: 0.02,
            latency_ms: 500,
            tool_success_rate: 0.95,
            tool_failure_types: vec![],
            retrieval_policy_id: Some(RetrievalPolicyId::new("r1")),
            num_docs: 0,
            evidence_usage_rate: 0.1,
            retrieval_policy_historical_success_rate: Some(0.5),
            prompt_template_id: None,
            prompt_template_historical_success_rate: None,
            generation_latency_ms: None,
            generation_cost_usd: None,
            planner_mode: PlannerMode::Normal,
            planner_path_contains_retry: false,
            generated_at: Timestamp::now(),
            extras: serde_json::Map::new(),
        }
    }

    #[test]
    fn run_signal_round_trips_through_json() {
        let signal = sample_signal();
        let bytes = serde_json::to_vec(&signal).expect("serialize");
        let restored: RunSignal = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(signal, restored);
    }

    #[test]
    fn planner_mode_degraded_classification() {
        assert!(!PlannerMode::Normal.is_degraded());
        assert!(PlannerMode::Degraded.is_degraded());
        assert!(PlannerMode::Minimal.is_degraded());
        assert!(PlannerMode::Fallback.is_degraded());
    }
}
