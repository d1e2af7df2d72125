// crates/revolve-runtime/src/kpi.rs
// ============================================================================
// Module: KPI Aggregator (C6)
// Description: Rolling per-key KPI accumulation across several keyspaces.
// Purpose: Give the Rollout Manager, A/B Gate, and Exploration Engine a
// single, atomically overwritten view of running statistics.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! [`KpiAggregator`] tracks one [`KpiEntry`] per key across four keyspaces —
//! `retrieval::{id}`, `prompt::{id}`, `tools::{signature}`, and
//! `policy::{version}` — and persists the whole table as a single
//! `policy_kpis.json` record, overwritten atomically on each tick.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use revolve_core::ArtifactStore;
use revolve_core::Attribution;
use revolve_core::FailureCause;
use revolve_core::RunSignal;
use serde::Deserialize;
use serde::Serialize;

use crate::error::RuntimeError;

/// Stable string label for a failure cause, used as a map key; avoids
/// leaning on `Debug` formatting for persisted data.
fn failure_cause_label(cause: FailureCause) -> &'static str {
    match cause {
        FailureCause::ToolTimeout => "TOOL_TIMEOUT",
        FailureCause::RetrievalMiss => "RETRIEVAL_MISS",
        FailureCause::PromptMismatch => "PROMPT_MISMATCH",
        FailureCause::PlannerError => "PLANNER_ERROR",
        FailureCause::EvidenceInsufficient => "EVIDENCE_INSUFFICIENT",
        FailureCause::GenerationHallucination => "GENERATION_HALLUCINATION",
        FailureCause::EnvironmentError => "ENVIRONMENT_ERROR",
        FailureCause::Unknown => "UNKNOWN",
    }
}

const KPI_KEY: &str = "policy_kpis.json";
/// Baseline regression thresholds: success rate drop, latency increase,
/// cost increase, each relative to a stored baseline.
pub const REGRESSION_SUCCESS_DROP: f64 = 0.10;
/// See [`REGRESSION_SUCCESS_DROP`].
pub const REGRESSION_LATENCY_INCREASE: f64 = 0.20;
/// See [`REGRESSION_SUCCESS_DROP`].
pub const REGRESSION_COST_INCREASE: f64 = 0.20;
/// Maximum number of recent latency samples kept for a p95 estimate.
pub const MAX_LATENCY_SAMPLES: usize = 500;

// ============================================================================
// SECTION: KpiEntry
// ============================================================================

/// Rolling statistics tracked for one keyspace entry (a retrieval policy, a
/// prompt template, a tool signature, or a policy version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiEntry {
    /// Number of runs folded into this entry.
    pub total_runs: u64,
    /// Rolling success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Rolling average cost in US dollars.
    pub avg_cost_usd: f64,
    /// Rolling average latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Rolling evidence utilization rate (mean `evidence_usage_rate`).
    pub evidence_utilization_rate: f64,
    /// Count of runs per primary failure cause (as a label).
    pub failure_cause_counts: BTreeMap<String, u64>,
    /// Recent latency samples, used to estimate p95.
    pub latency_samples_ms: Vec<f64>,
    /// Baseline success rate this entry is compared against for regression
    /// flags, set on first observation and never updated thereafter.
    pub baseline_success_rate: f64,
    /// Baseline average cost, see `baseline_success_rate`.
    pub baseline_avg_cost_usd: f64,
    /// Baseline average latency, see `baseline_success_rate`.
    pub baseline_avg_latency_ms: f64,
}

impl KpiEntry {
    fn new(signal: &RunSignal) -> Self {
        Self {
            total_runs: 0,
            success_rate: 0.0,
            avg_cost_usd: 0.0,
            avg_latency_ms: 0.0,
            evidence_utilization_rate: 0.0,
            failure_cause_counts: BTreeMap::new(),
            latency_samples_ms: Vec::new(),
            baseline_success_rate: f64::from(u8::from(signal.run_success)),
            baseline_avg_cost_usd: signal.cost_usd,
            baseline_avg_latency_ms: signal.latency_ms as f64,
        }
    }

    fn fold_in(&mut self, signal: &RunSignal, attribution: Option<&Attribution>) {
        self.total_runs += 1;
        let n = self.total_runs as f64;
        let success_value = f64::from(u8::from(signal.run_success));
        self.success_rate += (success_value - self.success_rate) / n;
        self.avg_cost_usd += (signal.cost_usd - self.avg_cost_usd) / n;
        self.avg_latency_ms += ((signal.latency_ms as f64) - self.avg_latency_ms) / n;
        self.evidence_utilization_rate += (signal.evidence_usage_rate - self.evidence_utilization_rate) / n;

        self.latency_samples_ms.push(signal.latency_ms as f64);
        if self.latency_samples_ms.len() > MAX_LATENCY_SAMPLES {
            self.latency_samples_ms.remove(0);
        }

        if let Some(attribution) = attribution {
            if attribution.failure {
                let label = failure_cause_label(attribution.primary_cause).to_string();
                *self.failure_cause_counts.entry(label).or_insert(0) += 1;
            }
        }
    }

    /// Estimated p95 latency over the retained recent samples.
    #[must_use]
    pub fn p95_latency_ms(&self) -> f64 {
        if self.latency_samples_ms.is_empty() {
            return 0.0;
        }
        let mut sorted = self.latency_samples_ms.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((sorted.len() as f64) * 0.95).floor() as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    /// The rolling failure rate, `1.0 - success_rate`.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        1.0 - self.success_rate
    }

    /// Regression flags versus this entry's stored baseline: success rate
    /// dropped by more than [`REGRESSION_SUCCESS_DROP`], latency grew by
    /// more than [`REGRESSION_LATENCY_INCREASE`], or cost grew by more than
    /// [`REGRESSION_COST_INCREASE`].
    #[must_use]
    pub fn regression_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.baseline_success_rate > 0.0 && self.success_rate < self.baseline_success_rate * (1.0 - REGRESSION_SUCCESS_DROP) {
            flags.push("success_rate_regression".to_string());
        }
        if self.baseline_avg_latency_ms > 0.0 && self.avg_latency_ms > self.baseline_avg_latency_ms * (1.0 + REGRESSION_LATENCY_INCREASE) {
            flags.push("latency_regression".to_string());
        }
        if self.baseline_avg_cost_usd > 0.0 && self.avg_cost_usd > self.baseline_avg_cost_usd * (1.0 + REGRESSION_COST_INCREASE) {
            flags.push("cost_regression".to_string());
        }
        flags
    }
}

// ============================================================================
// SECTION: KpiAggregator
// ============================================================================

/// The persisted table of [`KpiEntry`] records, keyed by keyspace string
/// (e.g. `"policy::3"`, `"retrieval::r1"`).
pub struct KpiAggregator<'store> {
    store: &'store dyn ArtifactStore,
    entries: BTreeMap<String, KpiEntry>,
}

impl<'store> KpiAggregator<'store> {
    /// Loads the KPI table from `store`, or starts empty if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the table exists but cannot be read.
    pub fn load(store: &'store dyn ArtifactStore) -> Result<Self, RuntimeError> {
        let entries = match store.get(KPI_KEY)? {
            Some(bytes) => serde_json::from_slice::<BTreeMap<String, KpiEntry>>(&bytes)?,
            None => BTreeMap::new(),
        };
        Ok(Self { store, entries })
    }

    /// Folds `signal` (and its `attribution`, when known) into every
    /// relevant keyspace: `policy::{id}`, `retrieval::{id}`, `prompt::{id}`,
    /// and `tools::{signature}` built from observed failure types.
    pub fn observe(&mut self, signal: &RunSignal, attribution: Option<&Attribution>) {
        let policy_key = format!("policy::{}", signal.policy_id.as_str());
        self.fold(&policy_key, signal, attribution);

        if let Some(retrieval_id) = &signal.retrieval_policy_id {
            let key = format!("retrieval::{}", retrieval_id.as_str());
            self.fold(&key, signal, attribution);
        }
        if let Some(prompt_id) = &signal.prompt_template_id {
            let key = format!("prompt::{}", prompt_id.as_str());
            self.fold(&key, signal, attribution);
        }
        for failure_type in &signal.tool_failure_types {
            let key = format!("tools::{failure_type}");
            self.fold(&key, signal, attribution);
        }
    }

    fn fold(&mut self, key: &str, signal: &RunSignal, attribution: Option<&Attribution>) {
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| KpiEntry::new(signal));
        entry.fold_in(signal, attribution);
    }

    /// Returns the current entry for `key`, if any observations have been
    /// folded into it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&KpiEntry> {
        self.entries.get(key)
    }

    /// Atomically overwrites the persisted KPI table with the current
    /// in-memory state.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the write fails.
    pub fn flush(&self) -> Result<(), RuntimeError> {
        let bytes = serde_json::to_vec(&self.entries)?;
        self.store.put(KPI_KEY, &bytes)?;
        Ok(())
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
    use revolve_core::PolicyId;
    use revolve_core::Timestamp;
    use revolve_core::identifiers::PlanId;
    use revolve_core::run::PlanPathType;
    use revolve_core::signal::PlannerMode;
    use revolve_store::FsArtifactStore;

    use super::*;

    fn signal(policy_id: &str, success: bool, cost: f64, latency: u64) -> RunSignal {
        RunSignal {
            schema_version: "1.0".to_string(),
            run_id: revolve_core::RunId::new("run-1"),
            policy_id: PolicyId::new(policy_id),
            plan_id: PlanId::new("plan-1"),
            plan_path_type: PlanPathType::Normal,
            pattern_key: None,
            pattern_is_new: true,
            pattern_historical_success_rate: None,
            run_success: success,
            cost_usd: cost,
            latency_ms: latency,
            tool_success_rate: 1.0,
            tool_failure_types: vec![],
            retrieval_policy_id: None,
            num_docs: 1,
            evidence_usage_rate: 0.8,
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
    fn observe_then_flush_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let mut aggregator = KpiAggregator::load(&store).expect("load");
        aggregator.observe(&signal("policy-1", true, 0.1, 100), None);
        aggregator.flush().expect("flush");

        let reloaded = KpiAggregator::load(&store).expect("reload");
        let entry = reloaded.get("policy::policy-1").expect("present");
        assert_eq!(entry.total_runs, 1);
    }

    #[test]
    fn success_rate_regression_is_flagged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let mut aggregator = KpiAggregator::load(&store).expect("load");
        aggregator.observe(&signal("policy-1", true, 0.1, 100), None);
        for _ in 0..9 {
            aggregator.observe(&signal("policy-1", false, 0.1, 100), None);
        }
        let entry = aggregator.get("policy::policy-1").expect("present");
        assert!(entry.regression_flags().contains(&"success_rate_regression".to_string()));
    }
}
