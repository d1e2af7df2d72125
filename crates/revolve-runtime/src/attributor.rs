// crates/revolve-runtime/src/attributor.rs
// ============================================================================
// Module: Decision Attributor (C5)
// Description: Produces an Attribution from a RunSignal by scoring each
// candidate failure cause against weighted evidence.
// Purpose: Give the Exploration Engine and KPI Aggregator a single cause per
// failed run, with calibrated confidence and per-layer blame weights.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! Scoring is a fixed set of weighted rules per cause (see the module-level
//! constants), never a learned model: this keeps attribution reproducible
//! and auditable. A successful run always yields
//! [`revolve_core::Attribution::neutral`]; a failed run's top-scoring cause
//! becomes `primary_cause`, with a tie-break against execution order when
//! two causes are within 5% of each other.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use revolve_core::Attribution;
use revolve_core::FailureCause;
use revolve_core::RunSignal;
use revolve_core::Timestamp;
use revolve_core::error::CoreError;
use revolve_core::signal::PlannerMode;

/// Layer name for tool-related evidence.
pub const LAYER_TOOLS: &str = "tools";
/// Layer name for retrieval-related evidence.
pub const LAYER_RETRIEVAL: &str = "retrieval";
/// Layer name for prompt/generation-related evidence.
pub const LAYER_PROMPT: &str = "prompt";
/// Layer name for planner-related evidence.
pub const LAYER_PLANNER: &str = "planner";

/// Generation latency above which `PROMPT_MISMATCH` gains evidence.
pub const HIGH_GENERATION_LATENCY_MS: u64 = 8_000;
/// Generation cost above which `PROMPT_MISMATCH` gains evidence.
pub const HIGH_GENERATION_COST_USD: f64 = 0.5;
/// Relative margin within which two top scores are considered tied.
pub const TIE_BREAK_MARGIN: f64 = 0.05;

// ============================================================================
// SECTION: Scoring
// ============================================================================

fn tool_timeout_score(signal: &RunSignal) -> f64 {
    let mut score = 0.0;
    for failure_type in &signal.tool_failure_types {
        score += match failure_type.as_str() {
            "TIMEOUT" => 1.0,
            "PERMISSION" => 0.6,
            "INVALID" => 0.5,
            "ENV" => 0.4,
            _ => 0.0,
        };
    }
    if signal.tool_success_rate < 0.7 {
        score += 0.5;
    }
    score
}

fn retrieval_miss_score(signal: &RunSignal) -> f64 {
    let mut score = 0.0;
    if signal.evidence_usage_rate < 0.3 {
        score += 1.0;
    }
    if signal.num_docs == 0 {
        score += 1.0;
    }
    if signal.retrieval_policy_historical_success_rate.is_some_and(|rate| rate < 0.6) {
        score += 0.5;
    }
    score
}

fn prompt_mismatch_score(signal: &RunSignal) -> f64 {
    let mut score = 0.0;
    if signal.prompt_template_historical_success_rate.is_some_and(|rate| rate < 0.7) {
        score += 1.0;
    }
    if signal.generation_latency_ms.is_some_and(|latency| latency > HIGH_GENERATION_LATENCY_MS) {
        score += 0.5;
    }
    if signal.generation_cost_usd.is_some_and(|cost| cost > HIGH_GENERATION_COST_USD) {
        score += 0.5;
    }
    score
}

fn planner_error_score(signal: &RunSignal) -> f64 {
    let mut score = 0.0;
    if signal.planner_mode.is_degraded() {
        score += 1.0;
    }
    if signal.planner_path_contains_retry {
        score += 0.5;
    }
    if signal.pattern_historical_success_rate.is_some_and(|rate| rate < 0.3) {
        score += 0.5;
    }
    score
}

/// Execution-order rank used to break ties: the earliest layer in a run's
/// pipeline wins when two causes are within [`TIE_BREAK_MARGIN`] of each
/// other.
fn layer_execution_rank(layer: &str) -> u8 {
    match layer {
        LAYER_TOOLS => 0,
        LAYER_RETRIEVAL => 1,
        LAYER_PROMPT => 2,
        LAYER_PLANNER => 3,
        _ => 4,
    }
}

fn cause_layer(cause: FailureCause) -> &'static str {
    match cause {
        FailureCause::ToolTimeout => LAYER_TOOLS,
        FailureCause::RetrievalMiss | FailureCause::EvidenceInsufficient => LAYER_RETRIEVAL,
        FailureCause::PromptMismatch | FailureCause::GenerationHallucination => LAYER_PROMPT,
        FailureCause::PlannerError => LAYER_PLANNER,
        FailureCause::EnvironmentError | FailureCause::Unknown => "unknown",
    }
}

// ============================================================================
// SECTION: Attribute
// ============================================================================

/// Produces an [`Attribution`] for `signal`.
///
/// # Errors
///
/// Returns [`CoreError`] if the resulting weight vector or confidence value
/// fails validation (this should only happen if a caller feeds in
/// out-of-range signal fields, since normalization here is exact).
pub fn attribute(signal: &RunSignal, now: Timestamp) -> Result<Attribution, CoreError> {
    if signal.run_success {
        return Ok(Attribution::neutral(signal.run_id.clone(), now));
    }

    let scores: [(FailureCause, f64); 4] = [
        (FailureCause::ToolTimeout, tool_timeout_score(signal)),
        (FailureCause::RetrievalMiss, retrieval_miss_score(signal)),
        (FailureCause::PromptMismatch, prompt_mismatch_score(signal)),
        (FailureCause::PlannerError, planner_error_score(signal)),
    ];

    let total: f64 = scores.iter().map(|(_, score)| score).sum();

    if total <= 0.0 {
        let mut weights = BTreeMap::new();
        weights.insert("unknown".to_string(), 1.0);
        return Attribution::new(
            signal.run_id.clone(),
            true,
            FailureCause::Unknown,
            "unknown",
            0.0,
            weights,
            vec![LAYER_TOOLS.to_string(), LAYER_RETRIEVAL.to_string(), LAYER_PROMPT.to_string(), LAYER_PLANNER.to_string()],
            vec!["no scoring evidence available".to_string()],
            now,
        );
    }

    let mut ranked: Vec<(FailureCause, f64)> = scores.iter().filter(|(_, score)| *score > 0.0).copied().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let best_score = ranked[0].1;
    let mut tied: Vec<(FailureCause, f64)> = ranked
        .iter()
        .copied()
        .filter(|(_, score)| (best_score - score) / best_score <= TIE_BREAK_MARGIN)
        .collect();
    tied.sort_by_key(|(cause, _)| layer_execution_rank(cause_layer(*cause)));

    let primary_cause = tied[0].0;
    let primary_layer = cause_layer(primary_cause);
    let confidence = best_score / total;

    let excluded_layers: Vec<String> = scores
        .iter()
        .filter(|(_, score)| *score <= 0.0)
        .map(|(cause, _)| cause_layer(*cause).to_string())
        .collect();

    let mut weights = BTreeMap::new();
    for (cause, score) in &scores {
        if *score > 0.0 {
            *weights.entry(cause_layer(*cause).to_string()).or_insert(0.0) += score / total;
        }
    }

    let supporting_signals = vec![
        format!("tool_success_rate={:.2}", signal.tool_success_rate),
        format!("evidence_usage_rate={:.2}", signal.evidence_usage_rate),
        format!("num_docs={}", signal.num_docs),
        format!("planner_mode_degraded={}", signal.planner_mode.is_degraded()),
    ];

    Attribution::new(
        signal.run_id.clone(),
        true,
        primary_cause,
        primary_layer,
        confidence,
        weights,
        excluded_layers,
        supporting_signals,
        now,
    )
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
    use revolve_core::PolicyId;
    use revolve_core::identifiers::PlanId;
    use revolve_core::run::PlanPathType;

    use super::*;

    fn base_signal() -> RunSignal {
        RunSignal {
            schema_version: "1.0".to_string(),
            run_id: revolve_core::RunId::new("run-1"),
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new("plan-1"),
            plan_path_type: PlanPathType::Normal,
            pattern_key: None,
            pattern_is_new: true,
            pattern_historical_success_rate: None,
            run_success: false,
            cost_usd: 0.01,
            latency_ms: 500,
            tool_success_rate: 0.95,
            tool_failure_types: vec![],
            retrieval_policy_id: None,
            num_docs: 0,
            evidence_usage_rate: 0.1,
            retrieval_policy_historical_success_rate: None,
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
    fn successful_run_yields_neutral_attribution() {
        let mut signal = base_signal();
        signal.run_success = true;
        let attribution = attribute(&signal, Timestamp::now()).expect("attribution");
        assert!(!attribution.failure);
        assert_eq!(attribution.primary_cause, FailureCause::Unknown);
        assert!((attribution.confidence - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn retrieval_miss_is_identified_when_evidence_is_sparse() {
        let mut signal = base_signal();
        signal.num_docs = 0;
        signal.evidence_usage_rate = 0.1;
        let attribution = attribute(&signal, Timestamp::now()).expect("attribution");
        assert_eq!(attribution.primary_cause, FailureCause::RetrievalMiss);
        assert_eq!(attribution.primary_layer, LAYER_RETRIEVAL);
        assert!(attribution.layer_blame_weights.get(LAYER_RETRIEVAL).copied().unwrap_or(0.0) >= 0.5);
    }

    #[test]
    fn weights_sum_to_one_within_tolerance() {
        let mut signal = base_signal();
        signal.tool_failure_types = vec!["TIMEOUT".to_string()];
        signal.num_docs = 0;
        let attribution = attribute(&signal, Timestamp::now()).expect("attribution");
        let sum: f64 = attribution.layer_blame_weights.values().sum();
        assert!((sum - 1.0).abs() <= 0.01);
    }
}
