// crates/revolve-runtime/src/signal_collector.rs
// ============================================================================
// Module: Signal Collector (C3)
// Description: Flattens a RunRecord and its events into the stable RunSignal
// contract, and maintains the bounded rolling file of recent signals.
// Purpose: Decouple every downstream learning component from RunRecord's
// internal layout.
// Dependencies: revolve-core, tracing
// ============================================================================

//! ## Overview
//! [`SignalCollector::build_signal`] is a pure function of its inputs:
//! identical `RunRecord`, events, and historical lookups always produce a
//! byte-identical [`RunSignal`] (modulo `generated_at`). Persisting a
//! signal is the only side-effecting step, and it is bounded: the rolling
//! file under `run_signals.json` never exceeds `max_signals` entries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use revolve_core::ArtifactStore;
use revolve_core::Event;
use revolve_core::RunRecord;
use revolve_core::RunSignal;
use revolve_core::Timestamp;
use revolve_core::identifiers::PatternKey;
use revolve_core::pattern::PatternSignature;
use revolve_core::pattern::evidence_count_bucket;
use revolve_core::run::PlanPathType;
use revolve_core::signal::PlannerMode;

use crate::error::RuntimeError;
use crate::working_memory::WorkingMemory;

const ROLLING_SIGNALS_KEY: &str = "run_signals.json";
/// Default bound on the number of most-recent signals retained on disk.
pub const DEFAULT_MAX_SIGNALS: usize = 10_000;

fn plan_path_to_planner_mode(plan_path_type: PlanPathType) -> PlannerMode {
    match plan_path_type {
        PlanPathType::Normal => PlannerMode::Normal,
        PlanPathType::Degraded => PlannerMode::Degraded,
        PlanPathType::Minimal => PlannerMode::Minimal,
    }
}

fn events_contain_retry(events: &[Event]) -> bool {
    events.iter().any(|event| {
        event
            .extras
            .get("retry")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    })
}

/// Lookups the caller supplies from other components' current state, since
/// the Signal Collector does not itself own KPI or pattern history.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoricalContext {
    /// Historical success rate of the run's retrieval policy, if known.
    pub retrieval_policy_historical_success_rate: Option<f64>,
    /// Historical success rate of the run's prompt template, if known.
    pub prompt_template_historical_success_rate: Option<f64>,
}

// ============================================================================
// SECTION: SignalCollector
// ============================================================================

/// Builds and persists [`RunSignal`] records.
pub struct SignalCollector<'store> {
    store: &'store dyn ArtifactStore,
    max_signals: usize,
}

impl<'store> SignalCollector<'store> {
    /// Builds a collector writing into `store`, retaining at most
    /// `max_signals` entries in the rolling file.
    #[must_use]
    pub fn new(store: &'store dyn ArtifactStore, max_signals: usize) -> Self {
        Self { store, max_signals }
    }

    /// Flattens `record` and `events` into a [`RunSignal`], consulting
    /// `working_memory` for the run's pattern history and `historical` for
    /// retrieval/prompt success rates.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the pattern signature cannot be hashed.
    pub fn build_signal(
        &self,
        record: &RunRecord,
        events: &[Event],
        working_memory: &WorkingMemory<'_>,
        historical: HistoricalContext,
    ) -> Result<RunSignal, RuntimeError> {
        let tool_sequence = record.tool_calls.iter().map(|call| call.tool_chain_id.clone()).collect();
        let doc_count = record.retrieval.as_ref().map_or(0, |retrieval| retrieval.doc_count);
        let signature = PatternSignature {
            tool_sequence,
            planner_choice: planner_choice_label(record.plan_path_type).to_string(),
            retrieval_policy_id: record.retrieval.as_ref().map(|retrieval| retrieval.retrieval_policy_id.clone()),
            evidence_count_bucket: evidence_count_bucket(doc_count).to_string(),
            prompt_template_id: record.prompt.as_ref().map(|prompt| prompt.prompt_template_id.clone()),
        };
        let pattern_key: PatternKey = signature.key()?;
        let existing_pattern = working_memory.get(&pattern_key);

        let tool_failure_types = record
            .tool_calls
            .iter()
            .filter_map(|call| call.failure_type.clone())
            .collect();

        Ok(RunSignal {
            schema_version: "1.0".to_string(),
            run_id: record.run_id.clone(),
            policy_id: record.policy_id.clone(),
            plan_id: record.plan_id.clone(),
            plan_path_type: record.plan_path_type,
            pattern_key: Some(pattern_key),
            pattern_is_new: existing_pattern.is_none(),
            pattern_historical_success_rate: existing_pattern.as_ref().map(revolve_core::PatternEntry::success_rate),
            run_success: record.success,
            cost_usd: record.cost_summary.total_usd,
            latency_ms: record.latency_ms,
            tool_success_rate: record.tool_success_rate(),
            tool_failure_types,
            retrieval_policy_id: record.retrieval.as_ref().map(|retrieval| retrieval.retrieval_policy_id.clone()),
            num_docs: doc_count,
            evidence_usage_rate: record.retrieval.as_ref().map_or(0.0, revolve_core::run::RetrievalSignal::evidence_usage_rate),
            retrieval_policy_historical_success_rate: historical.retrieval_policy_historical_success_rate,
            prompt_template_id: record.prompt.as_ref().map(|prompt| prompt.prompt_template_id.clone()),
            prompt_template_historical_success_rate: historical.prompt_template_historical_success_rate,
            generation_latency_ms: record.prompt.as_ref().map(|prompt| prompt.latency_ms),
            generation_cost_usd: record.prompt.as_ref().map(|prompt| prompt.cost_usd),
            planner_mode: plan_path_to_planner_mode(record.plan_path_type),
            planner_path_contains_retry: events_contain_retry(events),
            generated_at: Timestamp::now(),
            extras: serde_json::Map::new(),
        })
    }

    /// Appends `signal` to the rolling file, evicting the oldest entries
    /// beyond `max_signals`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the store read/write fails.
    pub fn persist(&self, signal: &RunSignal) -> Result<(), RuntimeError> {
        let mut signals: Vec<RunSignal> = match self.store.get(ROLLING_SIGNALS_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        signals.push(signal.clone());
        if signals.len() > self.max_signals {
            let overflow = signals.len() - self.max_signals;
            signals.drain(0..overflow);
        }
        let bytes = serde_json::to_vec(&signals)?;
        self.store.put(ROLLING_SIGNALS_KEY, &bytes)?;
        tracing::debug!(run_id = signal.run_id.as_str(), retained = signals.len(), "persisted run signal");
        Ok(())
    }

    /// Loads every currently retained signal from the rolling file.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the store read fails.
    pub fn load_recent(&self) -> Result<Vec<RunSignal>, RuntimeError> {
        match self.store.get(ROLLING_SIGNALS_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}

fn planner_choice_label(plan_path_type: PlanPathType) -> &'static str {
    match plan_path_type {
        PlanPathType::Normal => "normal",
        PlanPathType::Degraded => "degraded",
        PlanPathType::Minimal => "minimal",
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
    use std::collections::BTreeMap;

    use revolve_core::FinalState;
    use revolve_core::PolicyId;
    use revolve_core::RunId;
    use revolve_core::identifiers::PlanId;
    use revolve_core::run::CostSummary;
    use revolve_store::FsArtifactStore;

    use super::*;

    fn sample_record() -> RunRecord {
        RunRecord {
            schema_version: "1.0".to_string(),
            run_id: RunId::new("run-1"),
            created_at: Timestamp::now(),
            completed_at: Some(Timestamp::now()),
            final_state: FinalState::Failed,
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new("plan-1"),
            plan_path_type: PlanPathType::Normal,
            tool_calls: vec![],
            retrieval: None,
            prompt: None,
            cost_summary: CostSummary {
                total_usd: 0.02,
                per_layer_usd: BTreeMap::new(),
            },
            latency_ms: 500,
            success: false,
            extras: serde_json::Map::new(),
        }
    }

    #[test]
    fn build_signal_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let memory = WorkingMemory::load(&store, 100).expect("load");
        let collector = SignalCollector::new(&store, DEFAULT_MAX_SIGNALS);
        let record = sample_record();

        let first = collector
            .build_signal(&record, &[], &memory, HistoricalContext::default())
            .expect("build");
        let second = collector
            .build_signal(&record, &[], &memory, HistoricalContext::default())
            .expect("build");

        assert_eq!(first.pattern_key, second.pattern_key);
        assert_eq!(first.tool_success_rate, second.tool_success_rate);
        assert!(first.pattern_is_new);
    }

    #[test]
    fn persist_bounds_rolling_file_to_max_signals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let memory = WorkingMemory::load(&store, 100).expect("load");
        let collector = SignalCollector::new(&store, 2);
        let record = sample_record();

        for _ in 0..3 {
            let signal = collector
                .build_signal(&record, &[], &memory, HistoricalContext::default())
                .expect("build");
            collector.persist(&signal).expect("persist");
        }

        let retained = collector.load_recent().expect("load");
        assert_eq!(retained.len(), 2);
    }
}
