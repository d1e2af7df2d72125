// crates/revolve-controller/src/training.rs
// ============================================================================
// Module: Policy training and bookkeeping (C15.1)
// Description: Turns a batch of RunSignal examples into a trained Policy,
// plus the registry and training-metadata records the controller persists
// alongside it.
// Purpose: Isolate the pure training-rule math from the controller's
// orchestration so it can be tested without a store.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! [`train_policy`] is deterministic given its inputs: the same examples
//! and base policy always produce the same thresholds and plan selection
//! rules. Persistence (`policies/policy_{version}.json`,
//! `policy/registry.json`, `policies/training_metadata.json`) is the
//! controller's responsibility; this module only builds and loads the
//! records.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use revolve_core::ArtifactStore;
use revolve_core::Policy;
use revolve_core::RunSignal;
use revolve_core::Timestamp;
use revolve_core::identifiers::PlanId;
use revolve_core::policy::PlanSelectionRules;
use revolve_core::policy::PolicyMetadata;
use revolve_core::policy::PolicyThresholds;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ControllerError;

const POLICY_KEY_PREFIX: &str = "policies/policy_";
const TRAINING_METADATA_KEY: &str = "policies/training_metadata.json";
const POLICY_REGISTRY_KEY: &str = "policy/registry.json";
/// A plan needs at least this many observed examples before it is eligible
/// to be the preferred plan.
const MIN_SAMPLES_FOR_PREFERENCE: u64 = 3;
/// Below this many total examples, cost/latency ceilings are derived from
/// the observed maximum rather than a percentile.
const SMALL_SAMPLE_THRESHOLD: usize = 10;
/// Weight given to a freshly trained policy when blending against a base
/// policy's thresholds.
const BLEND_NEW_WEIGHT: f64 = 0.7;
/// Ceiling on the derived failure-rate tolerance, regardless of observed
/// failure rate.
const MAX_FAILURE_RATE_TOLERANCE: f64 = 0.3;
/// The default plan-path ladder appended to `fallback_order` after every
/// observed plan, for plans a training batch never exercised.
const DEFAULT_PLAN_LADDER: [&str; 3] = ["normal", "degraded", "minimal"];

// ============================================================================
// SECTION: PolicyRegistry
// ============================================================================

/// Bookkeeping record naming the currently active and most recently
/// trained policy versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRegistry {
    /// Schema version of this record.
    pub schema_version: String,
    /// The policy version currently serving production traffic, or `None`
    /// before any policy has ever been promoted.
    pub active_version: Option<u64>,
    /// The highest policy version ever trained.
    pub latest_version: u64,
    /// When this registry was last written.
    pub generated_at: Timestamp,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self { schema_version: "1.0".to_string(), active_version: None, latest_version: 0, generated_at: Timestamp::now() }
    }
}

/// Loads the policy registry, or `None` if it has never been written.
///
/// # Errors
///
/// Returns [`ControllerError`] if the store read or deserialization fails.
pub(crate) fn load_policy_registry(store: &dyn ArtifactStore) -> Result<Option<PolicyRegistry>, ControllerError> {
    match store.get(POLICY_REGISTRY_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Overwrites the persisted policy registry.
///
/// # Errors
///
/// Returns [`ControllerError`] if serialization or the store write fails.
pub(crate) fn persist_policy_registry(store: &dyn ArtifactStore, registry: &PolicyRegistry) -> Result<(), ControllerError> {
    let bytes = serde_json::to_vec(registry)?;
    store.put(POLICY_REGISTRY_KEY, &bytes)?;
    Ok(())
}

// ============================================================================
// SECTION: TrainingMetadata
// ============================================================================

/// Running counters the Learning Controller's two training triggers are
/// evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    /// Schema version of this record.
    pub schema_version: String,
    /// Total runs observed since the workspace was bootstrapped.
    pub total_runs: u64,
    /// Runs observed since the last completed training pass.
    pub runs_since_last_training: u64,
    /// When the last training pass completed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_training_at: Option<Timestamp>,
    /// The policy version produced by the last training pass, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_trained_version: Option<u64>,
}

impl Default for TrainingMetadata {
    fn default() -> Self {
        Self {
            schema_version: "1.0".to_string(),
            total_runs: 0,
            runs_since_last_training: 0,
            last_training_at: None,
            last_trained_version: None,
        }
    }
}

/// Loads training metadata, or `None` if it has never been written.
///
/// # Errors
///
/// Returns [`ControllerError`] if the store read or deserialization fails.
pub(crate) fn load_training_metadata(store: &dyn ArtifactStore) -> Result<Option<TrainingMetadata>, ControllerError> {
    match store.get(TRAINING_METADATA_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Overwrites the persisted training metadata.
///
/// # Errors
///
/// Returns [`ControllerError`] if serialization or the store write fails.
pub(crate) fn persist_training_metadata(store: &dyn ArtifactStore, metadata: &TrainingMetadata) -> Result<(), ControllerError> {
    let bytes = serde_json::to_vec(metadata)?;
    store.put(TRAINING_METADATA_KEY, &bytes)?;
    Ok(())
}

// ============================================================================
// SECTION: Policy persistence
// ============================================================================

/// Loads one policy version, or `None` if it was never written.
///
/// # Errors
///
/// Returns [`ControllerError`] if the store read or deserialization fails.
pub(crate) fn load_policy(store: &dyn ArtifactStore, version: u64) -> Result<Option<Policy>, ControllerError> {
    let key = format!("{POLICY_KEY_PREFIX}{version}.json");
    match store.get(&key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Persists `policy` under its version-derived key. Policies are never
/// overwritten once written; callers must pass a fresh version.
///
/// # Errors
///
/// Returns [`ControllerError`] if serialization or the store write fails.
pub(crate) fn persist_policy(store: &dyn ArtifactStore, policy: &Policy) -> Result<(), ControllerError> {
    let key = format!("{POLICY_KEY_PREFIX}{}.json", policy.policy_version);
    let bytes = serde_json::to_vec(policy)?;
    store.put(&key, &bytes)?;
    Ok(())
}

// ============================================================================
// SECTION: Percentile helper
// ============================================================================

/// The value at percentile `p` (in `[0, 1]`) of `values`, using the same
/// ceiling-rank convention `revolve_evolution::shadow` uses for p95.
fn percentile(mut values: Vec<f64>, p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let rank = ((values.len() as f64) * p).ceil() as usize;
    let index = rank.saturating_sub(1).min(values.len() - 1);
    values[index]
}

/// The maximum of `values`, or `0.0` if empty.
fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0_f64, f64::max)
}

// ============================================================================
// SECTION: train_policy
// ============================================================================

/// Per-plan observation counts used to derive `plan_selection_rules`.
struct PlanStats {
    /// Number of examples observed for this plan.
    samples: u64,
    /// Number of those examples that succeeded.
    successes: u64,
}

impl PlanStats {
    /// This plan's observed success rate, `0.0` if never observed.
    fn success_rate(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.successes as f64 / self.samples as f64 }
    }
}

/// Trains a new [`Policy`] from `examples`, optionally blending its
/// thresholds against `base`, and assigns it `next_version`.
///
/// Plan selection prefers the plan with the highest success rate among
/// plans observed at least [`MIN_SAMPLES_FOR_PREFERENCE`] times, falling
/// back to `"normal"` when no plan qualifies. Cost and latency ceilings are
/// the p90 observed value scaled by 1.5, or the observed maximum scaled by
/// 1.2 when `examples` is smaller than [`SMALL_SAMPLE_THRESHOLD`]. Failure
/// tolerance is `min(observed_failure_rate * 1.5, 0.3)`. When `base` is
/// `Some`, every numeric threshold is blended 70% new / 30% base.
///
/// # Errors
///
/// Returns [`ControllerError::NoTrainingExamples`] if `examples` is empty.
pub fn train_policy(examples: &[RunSignal], base: Option<&Policy>, next_version: u64) -> Result<Policy, ControllerError> {
    if examples.is_empty() {
        return Err(ControllerError::NoTrainingExamples);
    }

    let mut plan_stats: BTreeMap<PlanId, PlanStats> = BTreeMap::new();
    let mut costs = Vec::with_capacity(examples.len());
    let mut latencies = Vec::with_capacity(examples.len());
    let mut successes: u64 = 0;

    for example in examples {
        let stats = plan_stats.entry(example.plan_id.clone()).or_insert(PlanStats { samples: 0, successes: 0 });
        stats.samples += 1;
        if example.run_success {
            stats.successes += 1;
            successes += 1;
        }
        costs.push(example.cost_usd);
        latencies.push(example.latency_ms as f64);
    }

    let prefer_plan = plan_stats
        .iter()
        .filter(|(_, stats)| stats.samples >= MIN_SAMPLES_FOR_PREFERENCE)
        .max_by(|a, b| a.1.success_rate().partial_cmp(&b.1.success_rate()).unwrap_or(Ordering::Equal))
        .map(|(plan_id, _)| plan_id.clone())
        .unwrap_or_else(|| PlanId::new("normal"));

    let mut ranked: Vec<(PlanId, f64)> =
        plan_stats.iter().map(|(plan_id, stats)| (plan_id.clone(), stats.success_rate())).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    let mut fallback_order: Vec<PlanId> = ranked.into_iter().map(|(plan_id, _)| plan_id).collect();
    for rung in DEFAULT_PLAN_LADDER {
        let rung_id = PlanId::new(rung);
        if !fallback_order.contains(&rung_id) {
            fallback_order.push(rung_id);
        }
    }

    let small_sample = examples.len() < SMALL_SAMPLE_THRESHOLD;
    let max_cost_usd = if small_sample { max_of(&costs) * 1.2 } else { percentile(costs.clone(), 0.90) * 1.5 };
    let max_latency_ms = if small_sample { max_of(&latencies) * 1.2 } else { percentile(latencies.clone(), 0.90) * 1.5 };
    let observed_failure_rate = 1.0 - (successes as f64 / examples.len() as f64);
    let failure_rate_tolerance = (observed_failure_rate * 1.5).min(MAX_FAILURE_RATE_TOLERANCE);

    let thresholds = match base {
        Some(base) => PolicyThresholds {
            max_cost_usd: blend(max_cost_usd, base.thresholds.max_cost_usd),
            max_latency_ms: blend(max_latency_ms, base.thresholds.max_latency_ms),
            failure_rate_tolerance: blend(failure_rate_tolerance, base.thresholds.failure_rate_tolerance),
        },
        None => PolicyThresholds { max_cost_usd, max_latency_ms, failure_rate_tolerance },
    };

    let mut statistics = serde_json::Map::new();
    for (plan_id, stats) in &plan_stats {
        statistics.insert(
            plan_id.as_str().to_string(),
            serde_json::json!({ "samples": stats.samples, "success_rate": stats.success_rate() }),
        );
    }

    Ok(Policy {
        schema_version: "1.0".to_string(),
        policy_version: next_version,
        plan_selection_rules: PlanSelectionRules { prefer_plan, fallback_order },
        thresholds,
        metadata: PolicyMetadata { source_run_count: examples.len() as u64, statistics },
        generated_at: Timestamp::now(),
    })
}

/// Blends a freshly derived value with a base policy's value,
/// [`BLEND_NEW_WEIGHT`] to the new value.
fn blend(new_value: f64, base_value: f64) -> f64 {
    BLEND_NEW_WEIGHT * new_value + (1.0 - BLEND_NEW_WEIGHT) * base_value
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
    use revolve_core::PolicyId;
    use revolve_core::RunId;
    use revolve_core::Timestamp;
    use revolve_core::signal::PlannerMode;
    use revolve_store::FsArtifactStore;

    use super::*;

    fn example(plan: &str, success: bool, cost: f64, latency: u64) -> RunSignal {
        RunSignal {
            schema_version: "1.0".to_string(),
            run_id: RunId::new("run-1"),
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new(plan),
            plan_path_type: PlanPathType::Normal,
            pattern_key: None,
            pattern_is_new: false,
            pattern_historical_success_rate: None,
            run_success: success,
            cost_usd: cost,
            latency_ms: latency,
            tool_success_rate: 1.0,
            tool_failure_types: vec![],
            retrieval_policy_id: None,
            num_docs: 0,
            evidence_usage_rate: 0.0,
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
    fn empty_examples_is_an_error() {
        assert!(matches!(train_policy(&[], None, 1), Err(ControllerError::NoTrainingExamples)));
    }

    #[test]
    fn prefer_plan_favors_higher_success_rate_with_enough_samples() {
        let mut examples = Vec::new();
        for _ in 0..5 {
            examples.push(example("plan-a", true, 0.1, 100));
        }
        for _ in 0..5 {
            examples.push(example("plan-b", false, 0.1, 100));
        }
        let policy = train_policy(&examples, None, 1).expect("train");
        assert_eq!(policy.plan_selection_rules.prefer_plan.as_str(), "plan-a");
    }

    #[test]
    fn plans_below_sample_floor_are_not_preferred() {
        let mut examples = Vec::new();
        examples.push(example("plan-rare", true, 0.1, 100));
        for _ in 0..5 {
            examples.push(example("plan-common", true, 0.12, 110));
        }
        let policy = train_policy(&examples, None, 1).expect("train");
        assert_eq!(policy.plan_selection_rules.prefer_plan.as_str(), "plan-common");
    }

    #[test]
    fn fallback_order_appends_default_ladder() {
        let examples = vec![example("plan-a", true, 0.1, 100)];
        let policy = train_policy(&examples, None, 1).expect("train");
        let as_strings: Vec<&str> = policy.plan_selection_rules.fallback_order.iter().map(PlanId::as_str).collect();
        assert!(as_strings.contains(&"normal"));
        assert!(as_strings.contains(&"degraded"));
        assert!(as_strings.contains(&"minimal"));
    }

    #[test]
    fn blending_pulls_thresholds_toward_base() {
        let examples: Vec<RunSignal> = (0..20).map(|_| example("plan-a", true, 1.0, 1000)).collect();
        let base = Policy {
            schema_version: "1.0".to_string(),
            policy_version: 1,
            plan_selection_rules: PlanSelectionRules { prefer_plan: PlanId::new("plan-a"), fallback_order: vec![] },
            thresholds: PolicyThresholds { max_cost_usd: 100.0, max_latency_ms: 100_000.0, failure_rate_tolerance: 0.3 },
            metadata: PolicyMetadata { source_run_count: 1, statistics: serde_json::Map::new() },
            generated_at: Timestamp::now(),
        };
        let without_base = train_policy(&examples, None, 2).expect("train");
        let with_base = train_policy(&examples, Some(&base), 2).expect("train");
        assert!(with_base.thresholds.max_cost_usd > without_base.thresholds.max_cost_usd);
    }

    #[test]
    fn registry_round_trips_through_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        assert!(load_policy_registry(&store).expect("load").is_none());

        let mut registry = PolicyRegistry::default();
        registry.latest_version = 3;
        persist_policy_registry(&store, &registry).expect("persist");

        let reloaded = load_policy_registry(&store).expect("load").expect("present");
        assert_eq!(reloaded.latest_version, 3);
    }
}
