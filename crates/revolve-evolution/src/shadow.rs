// crates/revolve-evolution/src/shadow.rs
// ============================================================================
// Module: Shadow Executor (C9)
// Description: Runs an active and a candidate runner on the same RunSignal
// and diffs their outcomes, per-run or in aggregate.
// Purpose: Give the Exploration Engine and Learning Controller a
// production-safe way to compare a candidate against the active policy.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! Shadow execution never writes to any production-visible store; every
//! write in this module lands under the `shadow_diff/` namespace. Both
//! runners must be side-effect-free; they are invoked sequentially,
//! candidate after active, so the candidate sees a consistent snapshot of
//! any shared read-only state the active runner may have touched.
//!
//! Passing the same runner as both `active_runner` and `candidate_runner` is
//! accepted (the two parameters are independently named, not type-distinct)
//! but is a discouraged usage: it makes every observed divergence trivially
//! zero, which is indistinguishable from a genuinely identical policy. The
//! per-run API logs a warning when this happens; callers that want a true
//! comparison must supply runners backed by distinct policies.

use revolve_core::AggregateKpis;
use revolve_core::ArtifactStore;
use revolve_core::CandidateId;
use revolve_core::RunId;
use revolve_core::RunSignal;
use revolve_core::ShadowEvalReport;
use revolve_core::ShadowResult;
use revolve_core::Timestamp;
use revolve_core::hashing::inputs_hash;

use crate::error::EvolutionError;

// ============================================================================
// SECTION: ShadowRunner
// ============================================================================

/// One outcome a runner produces for a given [`RunSignal`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowRunOutcome {
    /// The decision the runner reached, compared by value across runners
    /// to detect divergence.
    pub decision_code: u32,
    /// Cost incurred by this run, in US dollars.
    pub cost_usd: f64,
    /// Latency incurred by this run, in milliseconds.
    pub latency_ms: f64,
    /// Whether this run was considered successful.
    pub success: bool,
    /// Whether the retrieved evidence was judged sufficient, for the
    /// aggregate evidence-pass-rate KPI.
    pub evidence_pass: bool,
}

/// A side-effect-free runner a caller supplies to be compared in shadow.
///
/// # Invariants
/// - Implementations must not write to any production-visible store;
///   [`run_shadow`] is only correct if both runners honor this.
pub trait ShadowRunner {
    /// Produces an outcome for `signal`.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError`] when the runner cannot produce an
    /// outcome.
    fn run(&self, signal: &RunSignal) -> Result<ShadowRunOutcome, EvolutionError>;
}

impl<F> ShadowRunner for F
where
    F: Fn(&RunSignal) -> Result<ShadowRunOutcome, EvolutionError>,
{
    fn run(&self, signal: &RunSignal) -> Result<ShadowRunOutcome, EvolutionError> {
        self(signal)
    }
}

// ============================================================================
// SECTION: Per-run shadow comparison
// ============================================================================

const SHADOW_DIFF_PREFIX: &str = "shadow_diff";

/// Runs `active_runner` then `candidate_runner` on `signal` and persists
/// the diff under the shadow namespace.
///
/// # Errors
///
/// Returns [`EvolutionError`] if either runner fails, the result cannot be
/// hashed, or the persisted write fails.
pub fn run_shadow(
    store: &dyn ArtifactStore,
    run_id: RunId,
    candidate_id: CandidateId,
    signal: &RunSignal,
    active_runner: &dyn ShadowRunner,
    candidate_runner: &dyn ShadowRunner,
) -> Result<ShadowResult, EvolutionError> {
    let active = active_runner.run(signal)?;
    let candidate = candidate_runner.run(signal)?;

    let inputs_hash = inputs_hash(&(run_id.as_str(), candidate_id.as_str(), signal))?;

    let result = ShadowResult {
        schema_version: "1.0".to_string(),
        run_id,
        candidate_id,
        inputs_hash,
        decision_divergence: active.decision_code != candidate.decision_code,
        cost_delta: candidate.cost_usd - active.cost_usd,
        latency_delta: candidate.latency_ms - active.latency_ms,
        success_delta: f64::from(u8::from(candidate.success)) - f64::from(u8::from(active.success)),
        generated_at: Timestamp::now(),
    };

    if !result.decision_divergence
        && (result.cost_delta).abs() < f64::EPSILON
        && (result.latency_delta).abs() < f64::EPSILON
    {
        tracing::warn!(
            run_id = %result.run_id,
            candidate_id = %result.candidate_id,
            "shadow comparison produced zero divergence across every field; \
             confirm active_runner and candidate_runner are backed by distinct policies"
        );
    }

    let key = format!("{SHADOW_DIFF_PREFIX}/{}.json", result.run_id.as_str());
    let bytes = serde_json::to_vec(&result)?;
    store.put(&key, &bytes)?;
    Ok(result)
}

// ============================================================================
// SECTION: Aggregate shadow evaluation
// ============================================================================

fn p95(mut samples: Vec<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((samples.len() as f64) * 0.95).ceil() as usize;
    let index = rank.saturating_sub(1).min(samples.len() - 1);
    samples[index]
}

fn aggregate(outcomes: &[ShadowRunOutcome]) -> AggregateKpis {
    if outcomes.is_empty() {
        return AggregateKpis { success_rate: 0.0, avg_cost_usd: 0.0, p95_latency_ms: 0.0, evidence_pass_rate: 0.0 };
    }
    let count = outcomes.len() as f64;
    let success_rate = outcomes.iter().filter(|o| o.success).count() as f64 / count;
    let avg_cost_usd = outcomes.iter().map(|o| o.cost_usd).sum::<f64>() / count;
    let p95_latency_ms = p95(outcomes.iter().map(|o| o.latency_ms).collect());
    let evidence_pass_rate = outcomes.iter().filter(|o| o.evidence_pass).count() as f64 / count;
    AggregateKpis { success_rate, avg_cost_usd, p95_latency_ms, evidence_pass_rate }
}

/// Simulates `signals` under both runners and computes aggregate KPI
/// deltas, for use by the A/B Gate (C11) and Learning Controller (C15).
///
/// This is the "aggregate mode" of the Shadow Executor: unlike
/// [`run_shadow`], it produces no per-run persisted record, only the
/// summary [`ShadowEvalReport`] the caller persists alongside the
/// candidate under evaluation.
///
/// # Errors
///
/// Returns [`EvolutionError`] if either runner fails on any signal or the
/// report cannot be hashed.
pub fn run_shadow_aggregate(
    candidate_id: CandidateId,
    signals: &[RunSignal],
    active_runner: &dyn ShadowRunner,
    candidate_runner: &dyn ShadowRunner,
) -> Result<ShadowEvalReport, EvolutionError> {
    let mut active_outcomes = Vec::with_capacity(signals.len());
    let mut candidate_outcomes = Vec::with_capacity(signals.len());
    for signal in signals {
        active_outcomes.push(active_runner.run(signal)?);
        candidate_outcomes.push(candidate_runner.run(signal)?);
    }

    let inputs_hash = inputs_hash(&(candidate_id.as_str(), signals))?;

    Ok(ShadowEvalReport {
        schema_version: "1.0".to_string(),
        candidate_id,
        inputs_hash,
        replay_count: u32::try_from(signals.len()).unwrap_or(u32::MAX),
        active: aggregate(&active_outcomes),
        candidate: aggregate(&candidate_outcomes),
        generated_at: Timestamp::now(),
    })
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
    use revolve_core::PlanPathType;
    use revolve_core::identifiers::PlanId;
    use revolve_core::identifiers::PolicyId;
    use revolve_store::FsArtifactStore;

    use super::*;

    fn sample_signal() -> RunSignal {
        RunSignal {
            schema_version: "1.0".to_string(),
            run_id: RunId::new("run-1"),
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new("plan-1"),
            plan_path_type: PlanPathType::Normal,
            pattern_key: None,
            pattern_is_new: false,
            pattern_historical_success_rate: None,
            run_success: true,
            cost_usd: 0.01,
            latency_ms: 100,
            tool_success_rate: 1.0,
            tool_failure_types: Vec::new(),
            retrieval_policy_id: None,
            num_docs: 0,
            evidence_usage_rate: 0.0,
            retrieval_policy_historical_success_rate: None,
            prompt_template_id: None,
            prompt_template_historical_success_rate: None,
            generation_latency_ms: None,
            generation_cost_usd: None,
            planner_mode: revolve_core::signal::PlannerMode::Normal,
            planner_path_contains_retry: false,
            generated_at: Timestamp::now(),
            extras: serde_json::Map::new(),
        }
    }

    #[test]
    fn run_shadow_detects_decision_divergence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let active = |_: &RunSignal| {
            Ok(ShadowRunOutcome { decision_code: 1, cost_usd: 0.1, latency_ms: 100.0, success: true, evidence_pass: true })
        };
        let candidate = |_: &RunSignal| {
            Ok(ShadowRunOutcome { decision_code: 2, cost_usd: 0.2, latency_ms: 150.0, success: true, evidence_pass: true })
        };

        let result = run_shadow(
            &store,
            RunId::new("run-1"),
            CandidateId::new("cand-1"),
            &sample_signal(),
            &active,
            &candidate,
        )
        .expect("shadow");

        assert!(result.decision_divergence);
        assert!((result.cost_delta - 0.1).abs() < 1e-9);
        assert!((result.latency_delta - 50.0).abs() < 1e-9);
    }

    #[test]
    fn run_shadow_persists_under_shadow_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let runner = |_: &RunSignal| {
            Ok(ShadowRunOutcome { decision_code: 1, cost_usd: 0.1, latency_ms: 100.0, success: true, evidence_pass: true })
        };
        run_shadow(&store, RunId::new("run-2"), CandidateId::new("cand-1"), &sample_signal(), &runner, &runner)
            .expect("shadow");
        assert!(store.get("shadow_diff/run-2.json").expect("get").is_some());
    }

    #[test]
    fn aggregate_report_averages_across_replays() {
        let signals = vec![sample_signal(), sample_signal()];
        let active = |_: &RunSignal| {
            Ok(ShadowRunOutcome { decision_code: 1, cost_usd: 0.1, latency_ms: 100.0, success: true, evidence_pass: true })
        };
        let candidate = |_: &RunSignal| {
            Ok(ShadowRunOutcome { decision_code: 1, cost_usd: 0.2, latency_ms: 300.0, success: false, evidence_pass: false })
        };
        let report = run_shadow_aggregate(CandidateId::new("cand-1"), &signals, &active, &candidate).expect("report");
        assert!((report.active.success_rate - 1.0).abs() < 1e-9);
        assert!((report.candidate.success_rate - 0.0).abs() < 1e-9);
        assert!((report.candidate.avg_cost_usd - 0.2).abs() < 1e-9);
    }
}
