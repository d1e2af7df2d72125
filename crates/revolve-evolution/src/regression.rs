// crates/revolve-evolution/src/regression.rs
// ============================================================================
// Module: Golden Replay / Regression Runner (C10)
// Description: Replays a curated-plus-recent-plus-novel suite against a
// candidate and compares aggregates to a golden baseline.
// Purpose: Block a candidate from reaching the A/B Gate or rollout when it
// regresses against known-good behavior.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! A suite item is replayed exactly once per candidate evaluation; the
//! runner is caller-supplied so tests can inject deterministic behavior.
//! `run_regression`'s suite cap truncates the combined golden/recent/novel
//! lists in that priority order, so the curated golden set is never
//! displaced by volume from the other two sources.

use std::collections::BTreeSet;

use revolve_core::ArtifactStore;
use revolve_core::CandidateId;
use revolve_core::RegressionVerdict;
use revolve_core::Timestamp;
use revolve_core::hashing::inputs_hash;
use serde::Serialize;

use crate::error::EvolutionError;

// ============================================================================
// SECTION: Suite and thresholds
// ============================================================================

/// One item in a regression suite.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayInput {
    /// Stable identifier for this suite item, for audit and dedup.
    pub input_id: String,
    /// The payload the replay runner is invoked with.
    pub payload: serde_json::Value,
    /// Whether this input is expected to succeed under a non-regressed
    /// candidate.
    pub expected_success: bool,
}

/// The result of replaying one [`ReplayInput`] under the candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    /// Whether the candidate succeeded on this input.
    pub success: bool,
    /// Cost incurred, in US dollars.
    pub cost_usd: f64,
    /// Latency incurred, in milliseconds.
    pub latency_ms: f64,
    /// The error type produced, if the replay failed.
    pub error_type: Option<String>,
}

/// A side-effect-free runner that replays one input against the candidate.
pub trait ReplayRunner {
    /// Produces a [`ReplayOutcome`] for `input`.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError`] when the replay cannot be executed.
    fn run(&self, input: &ReplayInput) -> Result<ReplayOutcome, EvolutionError>;
}

impl<F> ReplayRunner for F
where
    F: Fn(&ReplayInput) -> Result<ReplayOutcome, EvolutionError>,
{
    fn run(&self, input: &ReplayInput) -> Result<ReplayOutcome, EvolutionError> {
        self(input)
    }
}

/// Aggregate stats the candidate's replay suite is compared against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenBaseline {
    /// Golden success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Golden average cost, in US dollars.
    pub avg_cost_usd: f64,
    /// Error types already observed in the golden suite; a candidate
    /// producing any type outside this set trips `new_failure_modes`
    /// unless configured to allow it.
    pub known_error_types: BTreeSet<String>,
}

/// Drift thresholds and suite-size cap for regression checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionThresholds {
    /// Maximum number of suite items replayed, across all three sources.
    pub suite_cap: usize,
    /// Fractional success-rate drop (vs golden) that blocks.
    pub success_drop_threshold: f64,
    /// Fractional average-cost increase (vs golden) that blocks.
    pub cost_increase_threshold: f64,
    /// When `false`, any error type outside the golden set blocks.
    pub allow_new_failure_modes: bool,
}

impl Default for RegressionThresholds {
    fn default() -> Self {
        Self { suite_cap: 100, success_drop_threshold: 0.10, cost_increase_threshold: 0.10, allow_new_failure_modes: false }
    }
}

// ============================================================================
// SECTION: run_regression
// ============================================================================

const GOLDEN_REPLAY_PREFIX: &str = "eval";

/// Builds a suite from `golden`, `recent_failures`, and `novel_inputs` (in
/// that priority order, truncated to `thresholds.suite_cap`), replays it
/// against `runner`, and persists the verdict under
/// `eval/golden_replay_report_{candidate_id}.json`.
///
/// # Errors
///
/// Returns [`EvolutionError`] if the runner fails on any item, the verdict
/// cannot be hashed, or the persisted write fails.
pub fn run_regression(
    store: &dyn ArtifactStore,
    candidate_id: CandidateId,
    golden: &[ReplayInput],
    recent_failures: &[ReplayInput],
    novel_inputs: &[ReplayInput],
    baseline: &GoldenBaseline,
    thresholds: RegressionThresholds,
    runner: &dyn ReplayRunner,
) -> Result<RegressionVerdict, EvolutionError> {
    let suite: Vec<&ReplayInput> =
        golden.iter().chain(recent_failures.iter()).chain(novel_inputs.iter()).take(thresholds.suite_cap).collect();

    let mut blocking_reasons = Vec::new();
    let mut observed_error_types = BTreeSet::new();
    let mut success_regression_seen = false;
    let mut successes = 0usize;
    let mut total_cost_usd = 0.0;

    for input in &suite {
        let outcome = runner.run(input)?;
        if outcome.success {
            successes += 1;
        }
        total_cost_usd += outcome.cost_usd;
        if let Some(error_type) = &outcome.error_type {
            observed_error_types.insert(error_type.clone());
        }
        if input.expected_success && !outcome.success {
            success_regression_seen = true;
        }
    }

    let suite_size = u32::try_from(suite.len()).unwrap_or(u32::MAX);
    let candidate_success_rate = if suite.is_empty() { 1.0 } else { successes as f64 / suite.len() as f64 };
    let candidate_avg_cost_usd = if suite.is_empty() { 0.0 } else { total_cost_usd / suite.len() as f64 };

    if candidate_success_rate < baseline.success_rate * (1.0 - thresholds.success_drop_threshold) {
        blocking_reasons.push("success_rate_drop".to_string());
    }
    if candidate_avg_cost_usd > baseline.avg_cost_usd * (1.0 + thresholds.cost_increase_threshold) {
        blocking_reasons.push("cost_increase".to_string());
    }
    if !thresholds.allow_new_failure_modes && !observed_error_types.is_subset(&baseline.known_error_types) {
        blocking_reasons.push("new_failure_modes".to_string());
    }
    if success_regression_seen {
        blocking_reasons.push("success_regression".to_string());
    }

    let inputs_hash = inputs_hash(&(candidate_id.as_str(), &suite, baseline, thresholds.suite_cap))?;
    let generated_at = Timestamp::now();

    let verdict = if blocking_reasons.is_empty() {
        RegressionVerdict::passing(candidate_id, inputs_hash, suite_size, generated_at)
    } else {
        RegressionVerdict::blocking(candidate_id, inputs_hash, suite_size, blocking_reasons, generated_at)
    };

    let key = format!("{GOLDEN_REPLAY_PREFIX}/golden_replay_report_{}.json", verdict.candidate_id.as_str());
    let bytes = serde_json::to_vec(&verdict)?;
    store.put(&key, &bytes)?;
    Ok(verdict)
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
    use revolve_store::FsArtifactStore;

    use super::*;

    fn input(input_id: &str, expected_success: bool) -> ReplayInput {
        ReplayInput { input_id: input_id.to_string(), payload: serde_json::json!({}), expected_success }
    }

    fn baseline() -> GoldenBaseline {
        GoldenBaseline { success_rate: 0.95, avg_cost_usd: 0.05, known_error_types: BTreeSet::new() }
    }

    #[test]
    fn passing_candidate_has_no_blocking_reasons() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let golden = vec![input("g1", true), input("g2", true)];
        let runner = |_: &ReplayInput| Ok(ReplayOutcome { success: true, cost_usd: 0.04, latency_ms: 100.0, error_type: None });

        let verdict = run_regression(
            &store,
            CandidateId::new("cand-1"),
            &golden,
            &[],
            &[],
            &baseline(),
            RegressionThresholds::default(),
            &runner,
        )
        .expect("regression");

        assert!(verdict.pass_regression);
        assert!(verdict.blocking_reasons.is_empty());
    }

    #[test]
    fn success_regression_on_expected_success_input_blocks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let golden = vec![input("g1", true)];
        let runner = |_: &ReplayInput| {
            Ok(ReplayOutcome { success: false, cost_usd: 0.04, latency_ms: 100.0, error_type: Some("TOOL_TIMEOUT".to_string()) })
        };

        let verdict = run_regression(
            &store,
            CandidateId::new("cand-2"),
            &golden,
            &[],
            &[],
            &baseline(),
            RegressionThresholds::default(),
            &runner,
        )
        .expect("regression");

        assert!(!verdict.pass_regression);
        assert!(!verdict.safe_to_rollout);
        assert!(verdict.blocking_reasons.contains(&"success_regression".to_string()));
    }

    #[test]
    fn suite_cap_truncates_combined_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let golden: Vec<ReplayInput> = (0..5).map(|i| input(&format!("g{i}"), true)).collect();
        let novel: Vec<ReplayInput> = (0..5).map(|i| input(&format!("n{i}"), true)).collect();
        let runner = |_: &ReplayInput| Ok(ReplayOutcome { success: true, cost_usd: 0.0, latency_ms: 0.0, error_type: None });

        let thresholds = RegressionThresholds { suite_cap: 6, ..RegressionThresholds::default() };
        let verdict = run_regression(
            &store,
            CandidateId::new("cand-3"),
            &golden,
            &[],
            &novel,
            &GoldenBaseline { success_rate: 1.0, avg_cost_usd: 0.0, known_error_types: BTreeSet::new() },
            thresholds,
            &runner,
        )
        .expect("regression");

        assert_eq!(verdict.suite_size, 6);
    }
}
