// crates/revolve-core/src/eval.rs
// ============================================================================
// Module: Revolve Evaluation Model
// Description: The output records of shadow execution, regression testing,
// and A/B gating.
// Purpose: Give the Shadow Executor (C9), Regression Runner (C10), and A/B
// Gate (C11) validated, replayable result types.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every record in this module carries `inputs_hash` over the inputs that
//! produced it, so a given evaluation can later be proven reproducible from
//! its recorded inputs alone.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::CandidateId;
use crate::identifiers::RunId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: ShadowResult
// ============================================================================

/// The outcome of running an active and a candidate runner side by side on
/// the same input.
///
/// # Invariants
/// - Never written outside the shadow namespace; shadow execution has no
///   production-visible side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowResult {
    /// Schema version of this record.
    pub schema_version: String,
    /// The run this shadow comparison was derived from.
    pub run_id: RunId,
    /// The candidate evaluated against the active runner.
    pub candidate_id: CandidateId,
    /// Digest over the shadow comparison's inputs.
    pub inputs_hash: String,
    /// Whether the active and candidate runners reached different
    /// decisions.
    pub decision_divergence: bool,
    /// Candidate cost minus active cost, in US dollars.
    pub cost_delta: f64,
    /// Candidate latency minus active latency, in milliseconds.
    pub latency_delta: f64,
    /// Candidate success (1.0/0.0) minus active success (1.0/0.0).
    pub success_delta: f64,
    /// When this result was generated.
    pub generated_at: Timestamp,
}

// ============================================================================
// SECTION: RegressionVerdict
// ============================================================================

/// The outcome of replaying a candidate against the golden/recent/novel
/// suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionVerdict {
    /// Schema version of this record.
    pub schema_version: String,
    /// The candidate this verdict covers.
    pub candidate_id: CandidateId,
    /// Digest over the regression run's inputs (suite composition and
    /// thresholds).
    pub inputs_hash: String,
    /// Whether the candidate passed every regression check.
    pub pass_regression: bool,
    /// Whether the candidate is safe to proceed to rollout. Always `false`
    /// when `pass_regression` is `false`.
    pub safe_to_rollout: bool,
    /// Reasons the candidate was blocked, empty when `pass_regression` is
    /// `true`.
    pub blocking_reasons: Vec<String>,
    /// Number of suite items the candidate was evaluated against.
    pub suite_size: u32,
    /// When this verdict was generated.
    pub generated_at: Timestamp,
}

impl RegressionVerdict {
    /// Builds a passing verdict with no blocking reasons.
    #[must_use]
    pub fn passing(candidate_id: CandidateId, inputs_hash: String, suite_size: u32, generated_at: Timestamp) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            candidate_id,
            inputs_hash,
            pass_regression: true,
            safe_to_rollout: true,
            blocking_reasons: Vec::new(),
            suite_size,
            generated_at,
        }
    }

    /// Builds a blocking verdict. `reasons` must not be empty.
    #[must_use]
    pub fn blocking(
        candidate_id: CandidateId,
        inputs_hash: String,
        suite_size: u32,
        reasons: Vec<String>,
        generated_at: Timestamp,
    ) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            candidate_id,
            inputs_hash,
            pass_regression: false,
            safe_to_rollout: false,
            blocking_reasons: reasons,
            suite_size,
            generated_at,
        }
    }
}

// ============================================================================
// SECTION: ShadowEvalReport
// ============================================================================

/// Aggregate KPIs observed for one runner over a simulated replay set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateKpis {
    /// Fraction of replays that succeeded.
    pub success_rate: f64,
    /// Average cost across replays, in US dollars.
    pub avg_cost_usd: f64,
    /// p95 latency across replays, in milliseconds.
    pub p95_latency_ms: f64,
    /// Fraction of replays whose retrieved evidence was judged sufficient.
    pub evidence_pass_rate: f64,
}

/// Aggregate KPIs comparing the active and candidate runners over the N
/// most recent runs, replayed under both policies.
///
/// # Invariants
/// - Built from the same replay set for both runners, so `active` and
///   `candidate` are directly comparable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowEvalReport {
    /// Schema version of this record.
    pub schema_version: String,
    /// The candidate this report evaluates.
    pub candidate_id: CandidateId,
    /// Digest over the report's inputs (replay set and policy versions).
    pub inputs_hash: String,
    /// Number of replays the aggregate KPIs were computed over.
    pub replay_count: u32,
    /// Aggregate KPIs for the currently active policy.
    pub active: AggregateKpis,
    /// Aggregate KPIs for the candidate policy.
    pub candidate: AggregateKpis,
    /// When this report was generated.
    pub generated_at: Timestamp,
}

// ============================================================================
// SECTION: GateDecision
// ============================================================================

/// The observed value, threshold, and outcome of one A/B gate check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateCheck {
    /// Observed value for this check.
    pub observed: f64,
    /// Threshold this check was compared against.
    pub threshold: f64,
    /// Whether this individual check passed.
    pub passed: bool,
}

/// The outcome of the deterministic A/B gate evaluated over a shadow
/// evaluation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Schema version of this record.
    pub schema_version: String,
    /// The candidate this decision covers.
    pub candidate_id: CandidateId,
    /// Digest over the gate's inputs (the shadow evaluation report and
    /// thresholds).
    pub inputs_hash: String,
    /// Whether every check passed (logical AND of all four checks).
    pub gate_pass: bool,
    /// Human-readable reasons supporting the decision, one per check.
    pub reasons: Vec<String>,
    /// Reasons for checks that failed, empty when `gate_pass` is `true`.
    pub blocked_reasons: Vec<String>,
    /// Per-check results keyed by check name (`"success"`, `"cost"`,
    /// `"latency"`, `"evidence"`).
    pub checks: std::collections::BTreeMap<String, GateCheck>,
    /// When this decision was generated.
    pub generated_at: Timestamp,
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
    fn regression_verdict_passing_has_no_blocking_reasons() {
        let verdict = RegressionVerdict::passing(CandidateId::new("cand-1"), "hash".to_string(), 50, Timestamp::now());
        assert!(verdict.pass_regression);
        assert!(verdict.safe_to_rollout);
        assert!(verdict.blocking_reasons.is_empty());
    }

    #[test]
    fn regression_verdict_blocking_is_never_safe_to_rollout() {
        let verdict = RegressionVerdict::blocking(
            CandidateId::new("cand-1"),
            "hash".to_string(),
            50,
            vec!["success_regression".to_string()],
            Timestamp::now(),
        );
        assert!(!verdict.pass_regression);
        assert!(!verdict.safe_to_rollout);
        assert!(!verdict.blocking_reasons.is_empty());
    }

    #[test]
    fn shadow_result_round_trips_through_json() {
        let result = ShadowResult {
            schema_version: "1.0".to_string(),
            run_id: RunId::new("run-1"),
            candidate_id: CandidateId::new("cand-1"),
            inputs_hash: "hash".to_string(),
            decision_divergence: true,
            cost_delta: 0.01,
            latency_delta: 120.0,
            success_delta: -1.0,
            generated_at: Timestamp::now(),
        };
        let bytes = serde_json::to_vec(&result).expect("serialize");
        let restored: ShadowResult = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(result, restored);
    }
}
