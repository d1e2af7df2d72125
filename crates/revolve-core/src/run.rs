// crates/revolve-core/src/run.rs
// ============================================================================
// Module: Revolve Run Record
// Description: The record written once per executed run, capturing every
// per-layer signal needed to later attribute success or failure.
// Purpose: Give the Signal Collector (C3) and Decision Attributor (C5) a
// complete, replayable snapshot of a run.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`RunRecord`] is written exactly once, when a run reaches a terminal
//! state, and is never mutated afterward. Every field the attribution
//! pipeline might need is present or explicitly marked absent; there is no
//! implicit "missing means zero" convention.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::PlanId;
use crate::identifiers::PolicyId;
use crate::identifiers::PromptTemplateId;
use crate::identifiers::RetrievalPolicyId;
use crate::identifiers::RunId;
use crate::identifiers::ToolChainId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Final state
// ============================================================================

/// The terminal state a run reached.
///
/// # Invariants
/// - Closed enum; the wire form is upper-snake-case to match the historical
///   run-status vocabulary this system was distilled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalState {
    /// The run completed its plan successfully.
    Completed,
    /// The run failed.
    Failed,
    /// The run was paused and has not yet resumed.
    Paused,
    /// The run was cancelled before completion.
    Cancelled,
}

impl FinalState {
    /// Returns whether this terminal state counts as a run failure for
    /// attribution and KPI purposes.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed)
    }
}

// ============================================================================
// SECTION: Plan path type
// ============================================================================

/// Which execution path the plan actually followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPathType {
    /// The plan executed along its primary path.
    Normal,
    /// The plan fell back to a degraded path.
    Degraded,
    /// The plan fell back to a minimal path.
    Minimal,
}

// ============================================================================
// SECTION: Per-layer signal structs
// ============================================================================

/// One tool invocation observed during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSignal {
    /// Identifier of the tool (or tool-chain) invoked.
    pub tool_chain_id: ToolChainId,
    /// Whether the call succeeded.
    pub success: bool,
    /// The failure type, when `success` is false (e.g., `"TIMEOUT"`,
    /// `"PERMISSION"`, `"INVALID"`, `"ENV"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    /// Call latency in milliseconds.
    pub latency_ms: u64,
}

/// Retrieval-layer signals for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSignal {
    /// The retrieval policy used.
    pub retrieval_policy_id: RetrievalPolicyId,
    /// Number of documents returned.
    pub doc_count: u32,
    /// Documents actually used in the final answer.
    pub used_doc_ids: Vec<String>,
    /// Documents that conflicted with the used set.
    pub conflicting_doc_ids: Vec<String>,
}

impl RetrievalSignal {
    /// Fraction of retrieved documents that were actually used, a proxy for
    /// retrieval quality. Zero when `doc_count` is zero.
    #[must_use]
    pub fn evidence_usage_rate(&self) -> f64 {
        if self.doc_count == 0 {
            return 0.0;
        }
        (self.used_doc_ids.len() as f64) / f64::from(self.doc_count)
    }
}

/// Prompt/generation-layer signals for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSignal {
    /// The prompt template used.
    pub prompt_template_id: PromptTemplateId,
    /// Tokens consumed by the generation call.
    pub tokens: u32,
    /// Generation latency in milliseconds.
    pub latency_ms: u64,
    /// Generation cost in US dollars.
    pub cost_usd: f64,
}

/// Total and per-layer cost for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Total cost across every layer, in US dollars.
    pub total_usd: f64,
    /// Cost broken down by layer name (e.g., `"prompt"`, `"tools"`).
    pub per_layer_usd: BTreeMap<String, f64>,
}

// ============================================================================
// SECTION: RunRecord
// ============================================================================

/// The full record of one executed run.
///
/// # Invariants
/// - Written exactly once, at terminal state; never mutated afterward.
/// - Every field needed to replay attribution is present or explicitly
///   absent (`Option::None`), never silently omitted from the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Schema version of this record.
    pub schema_version: String,
    /// Unique identifier of this run.
    pub run_id: RunId,
    /// When the run was created.
    pub created_at: Timestamp,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// The run's terminal state.
    pub final_state: FinalState,
    /// The policy that governed this run.
    pub policy_id: PolicyId,
    /// The plan selected for this run.
    pub plan_id: PlanId,
    /// Which path the plan actually took.
    pub plan_path_type: PlanPathType,
    /// Tool calls observed during the run.
    pub tool_calls: Vec<ToolCallSignal>,
    /// Retrieval signals, when retrieval was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalSignal>,
    /// Prompt/generation signals, when generation occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptSignal>,
    /// Cost accounting for the run.
    pub cost_summary: CostSummary,
    /// Total wall-clock latency of the run in milliseconds.
    pub latency_ms: u64,
    /// Whether the run is considered successful by the outer system.
    pub success: bool,
    /// Forward-compatible extension bag.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl RunRecord {
    /// Returns the fraction of tool calls in this run that succeeded. `1.0`
    /// when there were no tool calls.
    #[must_use]
    pub fn tool_success_rate(&self) -> f64 {
        if self.tool_calls.is_empty() {
            return 1.0;
        }
        let successes = self.tool_calls.iter().filter(|call| call.success).count();
        (successes as f64) / (self.tool_calls.len() as f64)
    }
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

    fn sample_run() -> RunRecord {
        RunRecord {
            schema_version: "1.0".to_string(),
            run_id: RunId::new("run-1"),
            created_at: Timestamp::now(),
            completed_at: Some(Timestamp::now()),
            final_state: FinalState::Completed,
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new("plan-1"),
            plan_path_type: PlanPathType::Normal,
            tool_calls: vec![],
            retrieval: None,
            prompt: None,
            cost_summary: CostSummary {
                total_usd: 0.01,
                per_layer_usd: BTreeMap::new(),
            },
            latency_ms: 120,
            success: true,
            extras: serde_json::Map::new(),
        }
    }

    #[test]
    fn run_record_round_trips_through_json() {
        let record = sample_run();
        let bytes = serde_json::to_vec(&record).expect("serialize");
        let restored: RunRecord = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(record, restored);
    }

    #[test]
    fn tool_success_rate_is_one_when_no_calls() {
        let record = sample_run();
        assert!((record.tool_success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn final_state_wire_form_is_screaming_snake_case() {
        let json = serde_json::to_string(&FinalState::Failed).expect("serialize");
        assert_eq!(json, "\"FAILED\"");
    }

    #[test]
    fn evidence_usage_rate_is_zero_with_no_documents() {
        let signal = RetrievalSignal {
            retrieval_policy_id: RetrievalPolicyId::new("r1"),
            doc_count: 0,
            used_doc_ids: vec![],
            conflicting_doc_ids: vec![],
        };
        assert!((signal.evidence_usage_rate() - 0.0).abs() < f64::EPSILON);
    }
}
