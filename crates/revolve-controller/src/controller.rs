// crates/revolve-controller/src/controller.rs
// ============================================================================
// Module: Learning Controller (C15)
// Description: Orchestrates training triggers, policy training, shadow
// evaluation, the A/B gate, and rollout start/advance/rollback after every
// completed run.
// Purpose: The single entry point the run path's completion handler calls;
// every other component in this workspace is reached only through here or
// through an administrator's direct call into revolve-rollout.
// Dependencies: revolve-core, revolve-runtime, revolve-evolution,
// revolve-rollout, revolve-config
// ============================================================================

//! ## Overview
//! [`LearningController::on_run_completed`] implements the ten-step flow:
//! if a rollout is in progress, only its KPI check runs; otherwise two
//! independent triggers (a failure-rate threshold and a training cadence)
//! decide whether to retrain. Training, shadow evaluation, and gating are
//! best-effort: any step's failure is folded into the returned
//! [`LearningOutcome`] and logged, never propagated to the run path. The
//! administrative entry points ([`LearningController::start_canary`],
//! [`LearningController::rollback`], [`LearningController::reset_to_idle`])
//! are the exception — operator-invoked calls propagate their errors.

use revolve_config::RevolveConfig;
use revolve_core::ArtifactStore;
use revolve_core::PolicyKpi;
use revolve_core::PolicyId;
use revolve_core::RolloutState;
use revolve_core::RunSignal;
use revolve_core::Timestamp;
use revolve_core::identifiers::CandidateId;
use revolve_core::rollout::RolloutThresholds;
use revolve_evolution::GateThresholds;
use revolve_evolution::ShadowRunner;
use revolve_evolution::evaluate_gate;
use revolve_evolution::run_shadow_aggregate;
use revolve_rollout::RolloutManager;
use revolve_runtime::KpiAggregator;
use revolve_runtime::KpiEntry;
use revolve_runtime::SignalCollector;
use revolve_runtime::signal_collector::DEFAULT_MAX_SIGNALS;

use crate::error::ControllerError;
use crate::training;
use crate::training::PolicyRegistry;
use crate::training::TrainingMetadata;
use crate::training::train_policy;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// What `on_run_completed` actually did, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum LearningOutcome {
    /// A rollout was in progress; its KPI check ran and may have advanced,
    /// rolled back, or left the stage unchanged.
    RolloutChecked {
        /// The rollout state after the check.
        state: RolloutState,
    },
    /// Neither training trigger fired.
    Skipped {
        /// Why no training was attempted.
        reason: &'static str,
    },
    /// Training ran but the resulting policy version matched the active
    /// version already on file; nothing further happened.
    SkippedIdenticalVersion {
        /// The policy version that matched.
        policy_version: u64,
    },
    /// A new policy was trained and passed the A/B gate; a canary rollout
    /// was started.
    Promoted {
        /// The newly trained policy's version.
        policy_version: u64,
        /// The rollout state after `start_canary`.
        state: RolloutState,
    },
    /// A new policy was trained but blocked by the A/B gate.
    Blocked {
        /// The newly trained policy's version.
        policy_version: u64,
        /// Why the gate blocked it.
        reasons: Vec<String>,
    },
    /// A step in the flow failed; the failure was recorded and execution
    /// stopped without propagating to the caller.
    Failed {
        /// A human-readable description of what failed and where.
        reason: String,
    },
}

// ============================================================================
// SECTION: LearningController
// ============================================================================

const CONTROLLER_AUDIT_KEY: &str = "policies/controller_audit_log.jsonl";

/// One JSONL line recording a single `on_run_completed` decision.
#[derive(Debug, Clone, serde::Serialize)]
struct ControllerAuditEntry {
    /// The branch of the ten-step flow this entry covers (e.g.
    /// `"rollout_checked"`, `"trained"`, `"blocked"`, `"skipped"`).
    action: &'static str,
    /// The run that triggered this decision, when known.
    run_id: Option<String>,
    /// Free-form detail for this action (policy version, block reasons,
    /// etc.).
    detail: serde_json::Value,
    /// When this entry was recorded.
    timestamp: Timestamp,
}

fn append_controller_audit(
    store: &dyn ArtifactStore,
    action: &'static str,
    run_id: Option<&str>,
    detail: serde_json::Value,
) -> Result<(), ControllerError> {
    let entry = ControllerAuditEntry {
        action,
        run_id: run_id.map(str::to_string),
        detail,
        timestamp: Timestamp::now(),
    };
    let mut bytes = serde_json::to_vec(&entry)?;
    bytes.push(b'\n');
    store.append(CONTROLLER_AUDIT_KEY, &bytes)?;
    Ok(())
}

/// Builds a [`PolicyKpi`] view from a KPI Aggregator entry, or a zeroed
/// default when the key has never been observed.
fn policy_kpi_from_entry(entry: Option<&KpiEntry>) -> PolicyKpi {
    match entry {
        Some(entry) => PolicyKpi {
            total_runs: entry.total_runs,
            success_rate: entry.success_rate,
            avg_cost_usd: entry.avg_cost_usd,
            p95_latency_ms: entry.p95_latency_ms(),
            failure_rate: entry.failure_rate(),
            evidence_pass_rate: entry.evidence_utilization_rate,
        },
        None => PolicyKpi { total_runs: 0, success_rate: 0.0, avg_cost_usd: 0.0, p95_latency_ms: 0.0, failure_rate: 0.0, evidence_pass_rate: 0.0 },
    }
}

/// The orchestrator tying every other component's periodic output
/// together. Holds no state of its own beyond the artifact store and
/// configuration it was built with.
pub struct LearningController<'store> {
    store: &'store dyn ArtifactStore,
    config: RevolveConfig,
}

impl<'store> LearningController<'store> {
    /// Builds a controller over `store`, governed by `config`.
    #[must_use]
    pub fn new(store: &'store dyn ArtifactStore, config: RevolveConfig) -> Self {
        Self { store, config }
    }

    fn rollout_thresholds(&self) -> RolloutThresholds {
        RolloutThresholds {
            max_failure_rate: self.config.learning.max_failure_rate,
            min_success_uplift: self.config.gate.min_success_uplift,
            max_cost_increase: self.config.gate.max_cost_increase,
        }
    }

    fn gate_thresholds(&self) -> GateThresholds {
        GateThresholds {
            min_success_uplift: self.config.gate.min_success_uplift,
            max_cost_increase: self.config.gate.max_cost_increase,
            max_latency_increase_p95: self.config.gate.max_latency_increase_p95,
            min_evidence_pass_rate: self.config.gate.min_evidence_pass_rate,
        }
    }

    /// Runs the ten-step flow described in the module overview for one
    /// completed run's [`RunSignal`]. `active_runner` and `candidate_runner`
    /// simulate the active and a freshly trained candidate policy over
    /// recent signals; they are only invoked when training actually
    /// occurs.
    ///
    /// Every failure within the flow is caught, recorded in the returned
    /// [`LearningOutcome::Failed`] and the audit log, and never propagated.
    pub fn on_run_completed(
        &self,
        signal: &RunSignal,
        active_runner: &dyn ShadowRunner,
        candidate_runner: &dyn ShadowRunner,
    ) -> LearningOutcome {
        match self.on_run_completed_inner(signal, active_runner, candidate_runner) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(run_id = signal.run_id.as_str(), error = %err, "on_run_completed step failed");
                let reason = err.to_string();
                let _ = append_controller_audit(
                    self.store,
                    "failed",
                    Some(signal.run_id.as_str()),
                    serde_json::json!({ "error": reason }),
                );
                LearningOutcome::Failed { reason }
            }
        }
    }

    fn on_run_completed_inner(
        &self,
        signal: &RunSignal,
        active_runner: &dyn ShadowRunner,
        candidate_runner: &dyn ShadowRunner,
    ) -> Result<LearningOutcome, ControllerError> {
        let mut kpis = KpiAggregator::load(self.store)?;
        kpis.observe(signal, None);
        kpis.flush()?;

        let rollout = RolloutManager::new(self.store);

        // Step 1: a rollout already in progress only gets its KPI check.
        if let Some(state) = rollout.current()? {
            if !state.stage.tick_is_noop() {
                let active_kpi = policy_kpi_from_entry(kpis.get(&format!("policy::{}", state.active_policy.as_str())));
                let candidate_kpi = state
                    .candidate_policy
                    .as_ref()
                    .map(|candidate| policy_kpi_from_entry(kpis.get(&format!("policy::{}", candidate.as_str()))))
                    .unwrap_or_else(|| policy_kpi_from_entry(None));
                let updated = rollout.check_and_maybe_advance_or_rollback(&active_kpi, &candidate_kpi)?;
                let Some(state) = updated else {
                    return Err(ControllerError::NoActivePolicy);
                };
                append_controller_audit(
                    self.store,
                    "rollout_checked",
                    Some(signal.run_id.as_str()),
                    serde_json::json!({ "stage": format!("{:?}", state.stage) }),
                )?;
                return Ok(LearningOutcome::RolloutChecked { state });
            }
        }

        let registry = training::load_policy_registry(self.store)?.unwrap_or_default();
        let Some(active_version) = registry.active_version else {
            tracing::warn!("on_run_completed: no active policy has been bootstrapped; skipping training");
            return Ok(LearningOutcome::Skipped { reason: "no_active_policy" });
        };

        // Step 2/3: evaluate the two training triggers.
        let mut metadata = training::load_training_metadata(self.store)?.unwrap_or_default();
        metadata.total_runs += 1;
        metadata.runs_since_last_training += 1;

        let active_kpi = policy_kpi_from_entry(kpis.get(&format!("policy::policy-{active_version}")));
        let trigger_a =
            metadata.total_runs >= self.config.learning.min_runs && active_kpi.failure_rate > self.config.learning.max_failure_rate;
        let trigger_b = metadata.runs_since_last_training >= self.config.learning.min_runs_between_training;

        if !trigger_a && !trigger_b {
            training::persist_training_metadata(self.store, &metadata)?;
            append_controller_audit(self.store, "skipped", Some(signal.run_id.as_str()), serde_json::json!({}))?;
            return Ok(LearningOutcome::Skipped { reason: "no_trigger" });
        }

        // Step 4: assemble the training dataset.
        let collector = SignalCollector::new(self.store, DEFAULT_MAX_SIGNALS);
        let mut examples = collector.load_recent()?;
        let cap = self.config.learning.max_train_examples as usize;
        if examples.len() > cap {
            examples = examples.split_off(examples.len() - cap);
        }
        if examples.is_empty() {
            training::persist_training_metadata(self.store, &metadata)?;
            return Err(ControllerError::NoTrainingExamples);
        }

        // Step 5: train and persist the candidate policy.
        let base_policy = training::load_policy(self.store, active_version)?;
        let next_version = registry.latest_version + 1;
        let new_policy = train_policy(&examples, base_policy.as_ref(), next_version)?;
        training::persist_policy(self.store, &new_policy)?;

        let mut registry = registry;
        registry.latest_version = new_policy.policy_version;
        training::persist_policy_registry(self.store, &registry)?;

        metadata.runs_since_last_training = 0;
        metadata.last_training_at = Some(Timestamp::now());
        metadata.last_trained_version = Some(new_policy.policy_version);
        training::persist_training_metadata(self.store, &metadata)?;

        // Step 6: skip if this training run reproduced the active version.
        if registry.active_version == Some(new_policy.policy_version) {
            append_controller_audit(
                self.store,
                "skipped_identical_version",
                Some(signal.run_id.as_str()),
                serde_json::json!({ "policy_version": new_policy.policy_version }),
            )?;
            return Ok(LearningOutcome::SkippedIdenticalVersion { policy_version: new_policy.policy_version });
        }

        // Step 7: shadow-evaluate the candidate against the active policy
        // in aggregate, over the same training examples.
        let candidate_id = CandidateId::new(format!("learning-candidate-{}", new_policy.policy_version));
        let report = run_shadow_aggregate(candidate_id, &examples, active_runner, candidate_runner)?;

        // Step 8: run the A/B gate.
        let decision = evaluate_gate(&report, self.gate_thresholds())?;

        // Step 9/10: start a canary on pass, record blocked reasons on
        // fail, and always audit.
        if decision.gate_pass {
            let active_policy_id = PolicyId::new(format!("policy-{active_version}"));
            let candidate_policy_id = new_policy.policy_id();
            let state =
                rollout.start_canary(active_policy_id, candidate_policy_id, self.rollout_thresholds(), self.config.rollout.kpi_window)?;
            append_controller_audit(
                self.store,
                "promoted",
                Some(signal.run_id.as_str()),
                serde_json::json!({ "policy_version": new_policy.policy_version }),
            )?;
            Ok(LearningOutcome::Promoted { policy_version: new_policy.policy_version, state })
        } else {
            append_controller_audit(
                self.store,
                "blocked",
                Some(signal.run_id.as_str()),
                serde_json::json!({ "policy_version": new_policy.policy_version, "reasons": decision.blocked_reasons }),
            )?;
            Ok(LearningOutcome::Blocked { policy_version: new_policy.policy_version, reasons: decision.blocked_reasons })
        }
    }

    // ========================================================================
    // SECTION: Administrative passthroughs
    // ========================================================================

    /// Returns the current rollout state, if any rollout has ever started.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError`] if the store read fails.
    pub fn current_rollout(&self) -> Result<Option<RolloutState>, ControllerError> {
        Ok(RolloutManager::new(self.store).current()?)
    }

    /// Bootstraps the registry's active version and starts the workspace
    /// idle, for deployments with no prior policy history.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError`] if persistence fails.
    pub fn bootstrap_active_policy(&self, policy: &revolve_core::Policy) -> Result<RolloutState, ControllerError> {
        training::persist_policy(self.store, policy)?;
        let mut registry = training::load_policy_registry(self.store)?.unwrap_or_default();
        registry.active_version = Some(policy.policy_version);
        registry.latest_version = registry.latest_version.max(policy.policy_version);
        training::persist_policy_registry(self.store, &registry)?;

        let state = RolloutManager::new(self.store).reset_to_idle(policy.policy_id(), self.rollout_thresholds(), self.config.rollout.kpi_window)?;
        Ok(state)
    }

    /// Administrative rollback: reverts the in-progress rollout to the
    /// active policy regardless of current KPIs.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError`] if no rollout is in progress or
    /// persistence fails.
    pub fn rollback(&self) -> Result<RolloutState, ControllerError> {
        Ok(RolloutManager::new(self.store).force_rollback()?)
    }

    /// Administrative reset: clears any in-progress rollout and returns to
    /// idle with `active` as the sole active policy.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError`] if persistence fails.
    pub fn reset_to_idle(&self, active: PolicyId) -> Result<RolloutState, ControllerError> {
        let rollout = RolloutManager::new(self.store);
        Ok(rollout.reset_to_idle(active, self.rollout_thresholds(), self.config.rollout.kpi_window)?)
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
    use revolve_core::PlanPathType;
    use revolve_core::RunId;
    use revolve_core::identifiers::PlanId;
    use revolve_core::policy::PlanSelectionRules;
    use revolve_core::policy::PolicyMetadata;
    use revolve_core::policy::PolicyThresholds;
    use revolve_core::signal::PlannerMode;
    use revolve_evolution::shadow::ShadowRunOutcome;
    use revolve_store::FsArtifactStore;

    use super::*;

    fn signal(run_id: &str, plan: &str, success: bool) -> RunSignal {
        RunSignal {
            schema_version: "1.0".to_string(),
            run_id: RunId::new(run_id),
            policy_id: PolicyId::new("policy-1"),
            plan_id: PlanId::new(plan),
            plan_path_type: PlanPathType::Normal,
            pattern_key: None,
            pattern_is_new: false,
            pattern_historical_success_rate: None,
            run_success: success,
            cost_usd: 0.02,
            latency_ms: 200,
            tool_success_rate: 1.0,
            tool_failure_types: vec![],
            retrieval_policy_id: None,
            num_docs: 0,
            evidence_usage_rate: 0.5,
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

    fn passthrough_runner() -> impl ShadowRunner {
        |s: &RunSignal| {
            Ok(ShadowRunOutcome {
                decision_code: 1,
                cost_usd: s.cost_usd,
                latency_ms: s.latency_ms as f64,
                success: s.run_success,
                evidence_pass: true,
            })
        }
    }

    fn seed_active_policy(store: &dyn ArtifactStore) {
        let policy = revolve_core::Policy {
            schema_version: "1.0".to_string(),
            policy_version: 1,
            plan_selection_rules: PlanSelectionRules { prefer_plan: PlanId::new("normal"), fallback_order: vec![] },
            thresholds: PolicyThresholds { max_cost_usd: 1.0, max_latency_ms: 5000.0, failure_rate_tolerance: 0.2 },
            metadata: PolicyMetadata { source_run_count: 0, statistics: serde_json::Map::new() },
            generated_at: Timestamp::now(),
        };
        let controller = LearningController::new(store, RevolveConfig::default());
        controller.bootstrap_active_policy(&policy).expect("bootstrap");
    }

    #[test]
    fn skips_when_no_active_policy_bootstrapped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let controller = LearningController::new(&store, RevolveConfig::default());
        let runner = passthrough_runner();
        let outcome = controller.on_run_completed(&signal("run-1", "normal", true), &runner, &runner);
        assert_eq!(outcome, LearningOutcome::Skipped { reason: "no_active_policy" });
    }

    #[test]
    fn skips_training_when_neither_trigger_fires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        seed_active_policy(&store);

        let mut config = RevolveConfig::default();
        config.learning.min_runs = 1_000_000;
        config.learning.min_runs_between_training = 1_000_000;
        let controller = LearningController::new(&store, config);
        let runner = passthrough_runner();
        let outcome = controller.on_run_completed(&signal("run-1", "normal", true), &runner, &runner);
        assert_eq!(outcome, LearningOutcome::Skipped { reason: "no_trigger" });
    }

    #[test]
    fn trains_and_promotes_when_cadence_trigger_fires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        seed_active_policy(&store);

        let mut config = RevolveConfig::default();
        config.learning.min_runs_between_training = 1;
        config.learning.min_runs = 1_000_000;
        config.gate.min_evidence_pass_rate = 0.0;
        let controller = LearningController::new(&store, config);

        let collector = SignalCollector::new(&store, DEFAULT_MAX_SIGNALS);
        for i in 0..5 {
            collector.persist(&signal(&format!("seed-{i}"), "normal", true)).expect("persist");
        }

        let runner = passthrough_runner();
        let outcome = controller.on_run_completed(&signal("run-final", "normal", true), &runner, &runner);
        match outcome {
            LearningOutcome::Promoted { policy_version, .. } => assert_eq!(policy_version, 2),
            other => panic!("expected Promoted, got {other:?}"),
        }
    }

    #[test]
    fn rollout_in_progress_only_runs_kpi_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        seed_active_policy(&store);
        let rollout = RolloutManager::new(&store);
        let thresholds = RolloutThresholds { max_failure_rate: 0.5, min_success_uplift: 0.0, max_cost_increase: 0.5 };
        rollout.start_canary(PolicyId::new("policy-1"), PolicyId::new("policy-2"), thresholds, 100).expect("start_canary");

        let config = RevolveConfig::default();
        let controller = LearningController::new(&store, config);
        let runner = passthrough_runner();
        let outcome = controller.on_run_completed(&signal("run-1", "normal", true), &runner, &runner);
        assert!(matches!(outcome, LearningOutcome::RolloutChecked { .. }));
    }
}
