// crates/revolve-evolution/src/exploration.rs
// ============================================================================
// Module: Exploration Engine (C8)
// Description: Decides whether to explore after a run, generates candidate
// policies via mutation, and drives the first candidate through shadow and
// regression evaluation.
// Purpose: The only component that spawns new candidate policies; every
// other evolution component reads or evaluates what this one produces.
// Dependencies: revolve-core, rand
// ============================================================================

//! ## Overview
//! [`decide`] always runs and always persists an [`ExplorationDecision`],
//! even when `explore=false`. Candidate generation and the shadow/regression
//! evaluation of the first candidate only happen when `explore=true` and
//! the failure budget allows it; no candidate artifacts are created
//! otherwise. The discovery-reward formula in [`compute_reward`] combines
//! two kinds of "success" evidence that the rest of this workspace keeps
//! separate: `success_delta` (the per-run shadow divergence between active
//! and candidate on the same input) and `success_uplift` (the candidate's
//! aggregate improvement over the golden baseline, supplied by the caller
//! since a [`revolve_core::RegressionVerdict`] records only pass/fail, not
//! raw rates). `coverage_gain` is `1.0` when the triggering run's pattern
//! was newly observed, rewarding exploration of previously unseen pattern
//! space, `0.0` otherwise.

use std::collections::BTreeMap;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use revolve_core::ArtifactStore;
use revolve_core::Attribution;
use revolve_core::CandidateId;
use revolve_core::CandidatePolicy;
use revolve_core::CandidateStatus;
use revolve_core::FailureCause;
use revolve_core::RunId;
use revolve_core::RunSignal;
use revolve_core::ShadowResult;
use revolve_core::StrategyGenome;
use revolve_core::Timestamp;
use revolve_core::hashing::inputs_hash;
use revolve_core::identifiers::PolicyId;
use revolve_core::identifiers::PromptTemplateId;
use revolve_core::identifiers::RetrievalPolicyId;
use revolve_core::identifiers::ToolChainId;
use revolve_core::policy::EvaluationPlan;
use revolve_core::policy::MutationOperator;
use serde::Serialize;

use crate::error::EvolutionError;
use crate::regression::GoldenBaseline;
use crate::regression::RegressionThresholds;
use crate::regression::ReplayInput;
use crate::regression::ReplayRunner;
use crate::regression::run_regression;
use crate::shadow::ShadowRunner;
use crate::shadow::run_shadow;

// ============================================================================
// SECTION: ExplorationDecision
// ============================================================================

/// Guard state consulted when deciding whether to explore.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExplorationGuards {
    /// Whether the failure budget is currently hard-stopped.
    pub hard_stop: bool,
}

/// The always-emitted record describing whether, and why, this run
/// triggered exploration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorationDecision {
    /// Schema version of this record.
    pub schema_version: String,
    /// The run that triggered this decision.
    pub run_id: RunId,
    /// Whether exploration was triggered.
    pub explore: bool,
    /// Named triggers that fired, e.g. `"low_success_rate"`.
    pub triggers: Vec<String>,
    /// Layers targeted for mutation when `explore` is `true`.
    pub target_space: Vec<String>,
    /// Guard state at decision time.
    pub guards: ExplorationGuards,
    /// When this decision was made.
    pub generated_at: Timestamp,
}

const DECISIONS_PREFIX: &str = "exploration/decisions";
const REWARDS_PREFIX: &str = "exploration/rewards";
const CANDIDATES_PREFIX: &str = "policy/candidates";

/// Computes the target-space layers implied by an attribution's primary
/// cause.
fn target_space_for(attribution: Option<&Attribution>) -> Vec<String> {
    let Some(attribution) = attribution else {
        return vec!["retrieval".to_string(), "prompt".to_string(), "tool_combo".to_string()];
    };
    if !attribution.failure {
        return vec!["retrieval".to_string(), "prompt".to_string(), "tool_combo".to_string()];
    }
    match attribution.primary_cause {
        FailureCause::RetrievalMiss => vec!["retrieval".to_string()],
        FailureCause::PromptMismatch => vec!["prompt".to_string()],
        FailureCause::ToolTimeout => vec!["tool_combo".to_string()],
        _ => vec!["retrieval".to_string(), "prompt".to_string(), "tool_combo".to_string()],
    }
}

/// Decides whether `signal` should trigger exploration and persists the
/// decision under `exploration/decisions/{run_id}.json`.
///
/// `hard_stop` reflects the current [`crate::budget::FailureBudget`] state;
/// when set, `explore` is forced to `false` regardless of which triggers
/// fired.
///
/// # Errors
///
/// Returns [`EvolutionError`] if the decision cannot be serialized or
/// persisted.
pub fn decide(
    store: &dyn ArtifactStore,
    signal: &RunSignal,
    policy_success_rate: Option<f64>,
    attribution: Option<&Attribution>,
    hard_stop: bool,
) -> Result<ExplorationDecision, EvolutionError> {
    let mut triggers = Vec::new();
    if policy_success_rate.is_some_and(|rate| rate < 0.8) {
        triggers.push("low_success_rate".to_string());
    }
    if signal.pattern_is_new && !signal.run_success {
        triggers.push("new_pattern_failure".to_string());
    }

    let decision = ExplorationDecision {
        schema_version: "1.0".to_string(),
        run_id: signal.run_id.clone(),
        explore: !triggers.is_empty() && !hard_stop,
        target_space: target_space_for(attribution),
        triggers,
        guards: ExplorationGuards { hard_stop },
        generated_at: Timestamp::now(),
    };

    let key = format!("{DECISIONS_PREFIX}/{}.json", decision.run_id.as_str());
    let bytes = serde_json::to_vec(&decision)?;
    store.put(&key, &bytes)?;
    Ok(decision)
}

// ============================================================================
// SECTION: Candidate generation
// ============================================================================

/// The configured pools mutation operators draw replacement values from.
#[derive(Debug, Clone)]
pub struct MutationPool {
    /// Candidate retrieval policy ids.
    pub retrieval_policy_ids: Vec<RetrievalPolicyId>,
    /// Candidate prompt template ids.
    pub prompt_template_ids: Vec<PromptTemplateId>,
    /// Candidate tool-chain ids.
    pub tool_chain_ids: Vec<ToolChainId>,
    /// Inclusive `top_k` perturbation range.
    pub top_k_range: (u32, u32),
    /// Inclusive `tool_timeout_ms` perturbation range.
    pub tool_timeout_range_ms: (u64, u64),
}

/// Maps a target-space layer to the mutation operators eligible to act on
/// it.
fn operators_for_target(target: &str) -> &'static [MutationOperator] {
    match target {
        "retrieval" => &[MutationOperator::RetrievalSwitch, MutationOperator::ParamPerturbTopK],
        "prompt" => &[MutationOperator::PromptVariant],
        "tool_combo" => &[MutationOperator::ToolSwap, MutationOperator::ParamPerturbTimeout],
        _ => &[MutationOperator::RetrievalSwitch, MutationOperator::PromptVariant, MutationOperator::ToolSwap],
    }
}

/// Applies a single mutation operator to `genome`, drawing replacement
/// values from `pool` via `rng`.
fn apply_mutation(genome: &StrategyGenome, operator: MutationOperator, pool: &MutationPool, rng: &mut StdRng) -> StrategyGenome {
    let mut mutated = genome.clone();
    match operator {
        MutationOperator::RetrievalSwitch => {
            if let Some(id) = pick(rng, &pool.retrieval_policy_ids) {
                mutated.retrieval_policy_id = id.clone();
            }
        }
        MutationOperator::PromptVariant => {
            if let Some(id) = pick(rng, &pool.prompt_template_ids) {
                mutated.prompt_template_id = id.clone();
            }
        }
        MutationOperator::ToolSwap => {
            if let Some(id) = pick(rng, &pool.tool_chain_ids) {
                mutated.tool_chain_id = id.clone();
            }
        }
        MutationOperator::ParamPerturbTopK => {
            let (lo, hi) = pool.top_k_range;
            if lo <= hi {
                mutated.top_k = rng.gen_range(lo..=hi);
            }
        }
        MutationOperator::ParamPerturbTimeout => {
            let (lo, hi) = pool.tool_timeout_range_ms;
            if lo <= hi {
                mutated.tool_timeout_ms = rng.gen_range(lo..=hi);
            }
        }
    }
    mutated
}

/// Picks a uniformly random element from `items`, or `None` if empty.
fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() { None } else { items.get(rng.gen_range(0..items.len())) }
}

/// Generates up to `max_candidates` candidate policies by applying one
/// mutation operator (drawn from the operators eligible for `target_space`)
/// to `base_genome`, seeded deterministically from `seed` so repeated
/// calls with the same inputs produce the same candidates.
///
/// Each candidate is persisted under `policy/candidates/{candidate_id}.json`
/// with `status=generated`.
///
/// # Errors
///
/// Returns [`EvolutionError`] if a candidate cannot be hashed, serialized,
/// or persisted.
pub fn generate_candidates(
    store: &dyn ArtifactStore,
    parent_id: PolicyId,
    base_genome: &StrategyGenome,
    target_space: &[String],
    pool: &MutationPool,
    evaluation_plan: &EvaluationPlan,
    max_candidates: usize,
    seed: u64,
) -> Result<Vec<CandidatePolicy>, EvolutionError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let eligible: Vec<MutationOperator> =
        target_space.iter().flat_map(|target| operators_for_target(target).iter().copied()).collect();
    let eligible = if eligible.is_empty() { vec![MutationOperator::RetrievalSwitch] } else { eligible };

    let mut candidates = Vec::with_capacity(max_candidates);
    for index in 0..max_candidates {
        let operator = eligible[index % eligible.len()];
        let genome = apply_mutation(base_genome, operator, pool, &mut rng);
        let mutation_operators = vec![operator];
        let inputs_hash = inputs_hash(&(parent_id.as_str(), &genome, &mutation_operators))?;
        let candidate = CandidatePolicy {
            schema_version: "1.0".to_string(),
            candidate_id: CandidateId::new(format!("cand-{}-{index}", inputs_hash.chars().take(8).collect::<String>())),
            parent_id: parent_id.clone(),
            genome,
            mutation_operators,
            inputs_hash,
            evaluation_plan: evaluation_plan.clone(),
            status: CandidateStatus::Generated,
            generated_at: Timestamp::now(),
        };
        persist_candidate(store, &candidate)?;
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// Persists `candidate` under `policy/candidates/{candidate_id}.json`.
///
/// # Errors
///
/// Returns [`EvolutionError`] if `candidate` cannot be serialized or
/// written.
pub fn persist_candidate(store: &dyn ArtifactStore, candidate: &CandidatePolicy) -> Result<(), EvolutionError> {
    let key = format!("{CANDIDATES_PREFIX}/{}.json", candidate.candidate_id.as_str());
    let bytes = serde_json::to_vec(candidate)?;
    store.put(&key, &bytes)?;
    Ok(())
}

// ============================================================================
// SECTION: Discovery reward
// ============================================================================

/// The reward signal attached to the first candidate evaluated for a given
/// exploring run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryReward {
    /// Schema version of this record.
    pub schema_version: String,
    /// The run that triggered this candidate's evaluation.
    pub run_id: RunId,
    /// The candidate this reward covers.
    pub candidate_id: CandidateId,
    /// The combined reward value.
    pub reward_total: f64,
    /// Named components contributing to `reward_total`, for audit.
    pub components: BTreeMap<String, f64>,
    /// When this reward was computed.
    pub generated_at: Timestamp,
}

/// Computes the discovery reward for the first candidate's shadow result,
/// per the formula documented in the module overview.
#[allow(clippy::too_many_arguments, reason = "mirrors the full set of reward inputs")]
fn compute_reward(
    run_id: RunId,
    candidate_id: CandidateId,
    shadow: &ShadowResult,
    evidence_usage_rate: f64,
    pattern_is_new: bool,
    success_uplift: f64,
    attribution: Option<&Attribution>,
) -> DiscoveryReward {
    let focus_weight = attribution
        .map(|a| a.layer_blame_weights.values().copied().fold(0.0_f64, f64::max))
        .filter(|weight| *weight > 0.0)
        .unwrap_or(1.0);
    let decision_divergence = f64::from(u8::from(shadow.decision_divergence));
    let coverage_gain = if pattern_is_new { 1.0 } else { 0.0 };
    let penalty = shadow.cost_delta.max(0.0)
        + (shadow.latency_delta / 3000.0).max(0.0)
        + if evidence_usage_rate < 0.3 { 0.2 } else { 0.0 };

    let reward_total = focus_weight
        * (0.5 * decision_divergence
            + 0.5 * shadow.success_delta.max(0.0)
            + (1.0 - evidence_usage_rate).max(0.0)
            + coverage_gain
            + success_uplift.max(0.0)
            - penalty);

    let mut components = BTreeMap::new();
    components.insert("focus_weight".to_string(), focus_weight);
    components.insert("decision_divergence".to_string(), decision_divergence);
    components.insert("success_delta".to_string(), shadow.success_delta);
    components.insert("evidence_usage_rate".to_string(), evidence_usage_rate);
    components.insert("coverage_gain".to_string(), coverage_gain);
    components.insert("success_uplift".to_string(), success_uplift);
    components.insert("penalty".to_string(), penalty);

    DiscoveryReward {
        schema_version: "1.0".to_string(),
        run_id,
        candidate_id,
        reward_total,
        components,
        generated_at: Timestamp::now(),
    }
}

// ============================================================================
// SECTION: First-candidate evaluation
// ============================================================================

/// Drives the first generated candidate through shadow comparison and
/// regression evaluation, updates its status, and computes its discovery
/// reward. Only the first candidate in a decision's batch is evaluated
/// this way, per the cost-control rule in the module overview.
///
/// On regression failure the candidate's status becomes `rejected`;
/// otherwise it becomes `shadowing`. The updated candidate is re-persisted,
/// and the reward is persisted under `exploration/rewards/{run_id}.json`.
///
/// # Errors
///
/// Returns [`EvolutionError`] if shadow execution, regression evaluation,
/// or any persisted write fails.
#[allow(clippy::too_many_arguments, reason = "mirrors the full set of evaluation inputs")]
pub fn evaluate_first_candidate(
    store: &dyn ArtifactStore,
    candidate: &mut CandidatePolicy,
    signal: &RunSignal,
    active_runner: &dyn ShadowRunner,
    candidate_runner: &dyn ShadowRunner,
    golden: &[ReplayInput],
    recent_failures: &[ReplayInput],
    novel_inputs: &[ReplayInput],
    baseline: &GoldenBaseline,
    regression_thresholds: RegressionThresholds,
    replay_runner: &dyn ReplayRunner,
    attribution: Option<&Attribution>,
    success_uplift: f64,
) -> Result<(ShadowResult, revolve_core::RegressionVerdict, DiscoveryReward), EvolutionError> {
    let shadow = run_shadow(store, signal.run_id.clone(), candidate.candidate_id.clone(), signal, active_runner, candidate_runner)?;

    let verdict = run_regression(
        store,
        candidate.candidate_id.clone(),
        golden,
        recent_failures,
        novel_inputs,
        baseline,
        regression_thresholds,
        replay_runner,
    )?;

    candidate.status = if verdict.pass_regression { CandidateStatus::Shadowing } else { CandidateStatus::Rejected };
    persist_candidate(store, candidate)?;

    let reward = compute_reward(
        signal.run_id.clone(),
        candidate.candidate_id.clone(),
        &shadow,
        signal.evidence_usage_rate,
        signal.pattern_is_new,
        success_uplift,
        attribution,
    );
    let key = format!("{REWARDS_PREFIX}/{}.json", reward.run_id.as_str());
    let bytes = serde_json::to_vec(&reward)?;
    store.put(&key, &bytes)?;

    Ok((shadow, verdict, reward))
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
    use revolve_store::FsArtifactStore;

    use super::*;

    fn sample_signal(pattern_is_new: bool, run_success: bool) -> RunSignal {
        RunSignal {
            schema_version: "1.0".to_string(),
            run_id: RunId::new("run-1"),
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new("plan-1"),
            plan_path_type: PlanPathType::Normal,
            pattern_key: None,
            pattern_is_new,
            pattern_historical_success_rate: None,
            run_success,
            cost_usd: 0.01,
            latency_ms: 100,
            tool_success_rate: 1.0,
            tool_failure_types: Vec::new(),
            retrieval_policy_id: None,
            num_docs: 0,
            evidence_usage_rate: 0.1,
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
    fn decide_does_not_explore_when_no_trigger_fires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let signal = sample_signal(false, true);
        let decision = decide(&store, &signal, Some(0.95), None, false).expect("decide");
        assert!(!decision.explore);
    }

    #[test]
    fn decide_forces_no_explore_under_hard_stop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let signal = sample_signal(true, false);
        let decision = decide(&store, &signal, Some(0.5), None, true).expect("decide");
        assert!(!decision.explore);
        assert!(decision.guards.hard_stop);
    }

    #[test]
    fn decide_explores_on_new_pattern_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let signal = sample_signal(true, false);
        let decision = decide(&store, &signal, Some(0.95), None, false).expect("decide");
        assert!(decision.explore);
        assert!(decision.triggers.contains(&"new_pattern_failure".to_string()));
    }

    #[test]
    fn generate_candidates_is_deterministic_for_same_seed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let genome = StrategyGenome {
            retrieval_policy_id: RetrievalPolicyId::new("r0"),
            prompt_template_id: PromptTemplateId::new("p0"),
            tool_chain_id: ToolChainId::new("t0"),
            planner_mode: revolve_core::signal::PlannerMode::Normal,
            top_k: 5,
            tool_timeout_ms: 5000,
        };
        let pool = MutationPool {
            retrieval_policy_ids: vec![RetrievalPolicyId::new("r1"), RetrievalPolicyId::new("r2")],
            prompt_template_ids: vec![PromptTemplateId::new("p1")],
            tool_chain_ids: vec![ToolChainId::new("t1")],
            top_k_range: (3, 10),
            tool_timeout_range_ms: (1000, 9000),
        };
        let plan = EvaluationPlan { replay_count: 50, gate_thresholds: BTreeMap::new() };

        let first = generate_candidates(
            &store,
            PolicyId::new("policy-1"),
            &genome,
            &["retrieval".to_string()],
            &pool,
            &plan,
            2,
            42,
        )
        .expect("generate");
        let second = generate_candidates(
            &store,
            PolicyId::new("policy-1"),
            &genome,
            &["retrieval".to_string()],
            &pool,
            &plan,
            2,
            42,
        )
        .expect("generate");

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].genome, second[0].genome);
        assert_eq!(first[1].genome, second[1].genome);
    }
}
