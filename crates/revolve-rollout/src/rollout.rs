// crates/revolve-rollout/src/rollout.rs
// ============================================================================
// Module: Rollout Manager (C13)
// Description: The single writer of RolloutState: the three-stage
// idle/canary/partial/full state machine and its audit trail.
// Purpose: Move a candidate policy from first traffic exposure to full
// promotion, or divert it to rollback, on each periodic check.
// Dependencies: revolve-core, revolve-store
// ============================================================================

//! ## Overview
//! Every transition this module makes — start, advance, rollback, reset —
//! appends one line to `rollouts/audit_log.jsonl` before returning. The
//! audit log is append-only and is the durable record of "previous policy"
//! across a promotion: the entry preceding a `full` transition names the
//! active policy that the candidate replaced.

use std::collections::BTreeMap;

use revolve_core::ArtifactStore;
use revolve_core::PolicyKpi;
use revolve_core::RolloutStage;
use revolve_core::RolloutState;
use revolve_core::Timestamp;
use revolve_core::identifiers::PolicyId;
use revolve_core::rollout::RolloutThresholds;
use serde::Serialize;

use crate::error::RolloutError;
use crate::rollback;

/// The key under which the singleton [`RolloutState`] is persisted.
pub(crate) const ROLLOUT_STATE_KEY: &str = "rollouts/rollout_state.json";
/// The key under which the append-only rollout audit trail is persisted.
const AUDIT_LOG_KEY: &str = "rollouts/audit_log.jsonl";

/// Default traffic fraction a freshly started canary sends to the
/// candidate.
const CANARY_FRACTION: f64 = 0.05;
/// Default traffic fraction a rollout advanced past canary sends to the
/// candidate.
const PARTIAL_FRACTION: f64 = 0.25;

// ============================================================================
// SECTION: Load / persist
// ============================================================================

/// Loads the current [`RolloutState`], or `None` if no rollout has ever been
/// started.
///
/// # Errors
///
/// Returns [`RolloutError`] if a persisted state exists but cannot be read.
pub(crate) fn load_rollout_state(store: &dyn ArtifactStore) -> Result<Option<RolloutState>, RolloutError> {
    match store.get(ROLLOUT_STATE_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Persists `state` as the singleton [`RolloutState`].
///
/// # Errors
///
/// Returns [`RolloutError`] if the write fails.
pub(crate) fn persist_rollout_state(store: &dyn ArtifactStore, state: &RolloutState) -> Result<(), RolloutError> {
    let bytes = serde_json::to_vec(state)?;
    store.put(ROLLOUT_STATE_KEY, &bytes)?;
    Ok(())
}

// ============================================================================
// SECTION: Audit log
// ============================================================================

/// One append-only audit entry recorded on every rollout state transition.
#[derive(Debug, Clone, Serialize)]
struct AuditEntry {
    /// The operation that produced this entry.
    action: &'static str,
    /// The stage the rollout was in before this transition.
    from_stage: RolloutStage,
    /// The stage the rollout is in after this transition.
    to_stage: RolloutStage,
    /// The active policy after this transition.
    active_policy: PolicyId,
    /// The candidate policy after this transition, if any.
    candidate_policy: Option<PolicyId>,
    /// The traffic split after this transition.
    traffic_split: BTreeMap<String, f64>,
    /// Whether the KPI check passed, for transitions driven by one.
    kpi_check: Option<bool>,
    /// When this transition occurred.
    timestamp: Timestamp,
}

/// Appends one audit entry to `rollouts/audit_log.jsonl` describing the
/// transition that produced `state`.
fn append_audit_entry(
    store: &dyn ArtifactStore,
    action: &'static str,
    from_stage: RolloutStage,
    state: &RolloutState,
    kpi_check: Option<bool>,
) -> Result<(), RolloutError> {
    let entry = AuditEntry {
        action,
        from_stage,
        to_stage: state.stage,
        active_policy: state.active_policy.clone(),
        candidate_policy: state.candidate_policy.clone(),
        traffic_split: state.traffic_split.clone(),
        kpi_check,
        timestamp: state.last_checked_at,
    };
    let mut line = serde_json::to_vec(&entry)?;
    line.push(b'\n');
    store.append(AUDIT_LOG_KEY, &line)?;
    Ok(())
}

// ============================================================================
// SECTION: KPI check
// ============================================================================

/// `true` if every advance condition holds: candidate failure rate within
/// bound, candidate success rate meets the required uplift over active, and
/// candidate cost increase is within bound.
fn kpi_check_passes(active_kpi: &PolicyKpi, candidate_kpi: &PolicyKpi, thresholds: &RolloutThresholds) -> bool {
    let failure_ok = candidate_kpi.failure_rate <= thresholds.max_failure_rate;
    let success_ok = candidate_kpi.success_rate - active_kpi.success_rate >= thresholds.min_success_uplift;
    let cost_ok = if active_kpi.avg_cost_usd > 0.0 {
        (candidate_kpi.avg_cost_usd - active_kpi.avg_cost_usd) / active_kpi.avg_cost_usd <= thresholds.max_cost_increase
    } else {
        true
    };
    failure_ok && success_ok && cost_ok
}

// ============================================================================
// SECTION: RolloutManager
// ============================================================================

/// The sole writer of [`RolloutState`].
pub struct RolloutManager<'store> {
    store: &'store dyn ArtifactStore,
}

impl<'store> RolloutManager<'store> {
    /// Binds a manager to `store`.
    #[must_use]
    pub fn new(store: &'store dyn ArtifactStore) -> Self {
        Self { store }
    }

    /// Returns the current [`RolloutState`], or `None` if no rollout has
    /// ever been started.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError`] if the persisted state cannot be read.
    pub fn current(&self) -> Result<Option<RolloutState>, RolloutError> {
        load_rollout_state(self.store)
    }

    /// Starts a canary rollout of `candidate` against `active`, sending
    /// [`CANARY_FRACTION`] of traffic to the candidate.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::Refused`] if a rollout is already in progress
    /// (stage is `canary` or `partial`), or [`RolloutError`] if the store
    /// fails.
    pub fn start_canary(
        &self,
        active: PolicyId,
        candidate: PolicyId,
        thresholds: RolloutThresholds,
        kpi_window: u32,
    ) -> Result<RolloutState, RolloutError> {
        let existing = load_rollout_state(self.store)?;
        let from_stage = existing.as_ref().map_or(RolloutStage::Idle, |state| state.stage);
        if matches!(from_stage, RolloutStage::Canary | RolloutStage::Partial) {
            return Err(RolloutError::Refused {
                stage: format!("{from_stage:?}"),
                reason: "a rollout is already in progress",
            });
        }

        let now = Timestamp::now();
        let mut traffic_split = BTreeMap::new();
        traffic_split.insert(active.as_str().to_string(), 1.0 - CANARY_FRACTION);
        traffic_split.insert(candidate.as_str().to_string(), CANARY_FRACTION);

        let state = RolloutState {
            schema_version: "1.0".to_string(),
            active_policy: active,
            candidate_policy: Some(candidate),
            stage: RolloutStage::Canary,
            traffic_split,
            thresholds,
            kpi_window,
            started_at: now,
            last_checked_at: now,
            rollback_from_stage: None,
            rollback_from_split: None,
            rollback_at: None,
        };
        state.validate_traffic_split()?;

        persist_rollout_state(self.store, &state)?;
        append_audit_entry(self.store, "start_canary", from_stage, &state, None)?;
        Ok(state)
    }

    /// Evaluates the current stage's KPI check and advances to the next
    /// stage on pass, or diverts to rollback on failure.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::Refused`] if no rollout is in progress
    /// (stage is `idle`, `full`, or `rollback`), or [`RolloutError`] if the
    /// store fails.
    pub fn advance_stage(&self, active_kpi: &PolicyKpi, candidate_kpi: &PolicyKpi) -> Result<RolloutState, RolloutError> {
        let Some(state) = load_rollout_state(self.store)? else {
            return Err(RolloutError::Refused { stage: "idle".to_string(), reason: "no rollout is in progress" });
        };
        if state.stage.tick_is_noop() {
            return Err(RolloutError::Refused {
                stage: format!("{:?}", state.stage),
                reason: "no rollout is in progress",
            });
        }

        let passes = kpi_check_passes(active_kpi, candidate_kpi, &state.thresholds);
        if !passes {
            return self.rollback_from(state);
        }

        let from_stage = state.stage;
        let now = Timestamp::now();
        let next_state = match state.stage {
            RolloutStage::Canary => {
                let Some(candidate) = state.candidate_policy.clone() else {
                    return Err(RolloutError::Refused { stage: "canary".to_string(), reason: "rollout has no candidate policy" });
                };
                let mut traffic_split = BTreeMap::new();
                traffic_split.insert(state.active_policy.as_str().to_string(), 1.0 - PARTIAL_FRACTION);
                traffic_split.insert(candidate.as_str().to_string(), PARTIAL_FRACTION);
                RolloutState { stage: RolloutStage::Partial, traffic_split, last_checked_at: now, ..state }
            }
            RolloutStage::Partial => {
                let Some(candidate) = state.candidate_policy.clone() else {
                    return Err(RolloutError::Refused { stage: "partial".to_string(), reason: "rollout has no candidate policy" });
                };
                let mut traffic_split = BTreeMap::new();
                traffic_split.insert(candidate.as_str().to_string(), 1.0);
                RolloutState {
                    active_policy: candidate,
                    candidate_policy: None,
                    stage: RolloutStage::Full,
                    traffic_split,
                    last_checked_at: now,
                    ..state
                }
            }
            RolloutStage::Idle | RolloutStage::Full | RolloutStage::Rollback => {
                return Err(RolloutError::Refused {
                    stage: format!("{:?}", state.stage),
                    reason: "no rollout is in progress",
                });
            }
        };
        next_state.validate_traffic_split()?;

        persist_rollout_state(self.store, &next_state)?;
        append_audit_entry(self.store, "advance_stage", from_stage, &next_state, Some(true))?;
        Ok(next_state)
    }

    /// Periodic tick: a no-op in `idle`, `full`, or `rollback`; otherwise
    /// delegates to [`Self::advance_stage`].
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError`] if the store fails.
    pub fn check_and_maybe_advance_or_rollback(
        &self,
        active_kpi: &PolicyKpi,
        candidate_kpi: &PolicyKpi,
    ) -> Result<Option<RolloutState>, RolloutError> {
        let Some(state) = load_rollout_state(self.store)? else {
            return Ok(None);
        };
        if state.stage.tick_is_noop() {
            return Ok(Some(state));
        }
        self.advance_stage(active_kpi, candidate_kpi).map(Some)
    }

    /// Resets the rollout to `idle` for a freshly resolved active policy.
    /// Used administratively, including to leave the resting `full` stage.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError`] if the store fails.
    pub fn reset_to_idle(&self, active: PolicyId, thresholds: RolloutThresholds, kpi_window: u32) -> Result<RolloutState, RolloutError> {
        let existing = load_rollout_state(self.store)?;
        let from_stage = existing.as_ref().map_or(RolloutStage::Idle, |state| state.stage);

        let state = RolloutState::idle(active, thresholds, kpi_window, Timestamp::now());
        persist_rollout_state(self.store, &state)?;
        append_audit_entry(self.store, "reset_to_idle", from_stage, &state, None)?;
        Ok(state)
    }

    /// Administrative rollback: diverts the in-progress rollout to
    /// `rollback` regardless of KPIs, for an operator acting on information
    /// this module has no visibility into.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::Refused`] if no rollout is in progress
    /// (stage is `idle`, `full`, or `rollback`), or [`RolloutError`] if the
    /// store fails.
    pub fn force_rollback(&self) -> Result<RolloutState, RolloutError> {
        let Some(state) = load_rollout_state(self.store)? else {
            return Err(RolloutError::Refused { stage: "idle".to_string(), reason: "no rollout is in progress" });
        };
        if state.stage.tick_is_noop() {
            return Err(RolloutError::Refused {
                stage: format!("{:?}", state.stage),
                reason: "no rollout is in progress",
            });
        }
        self.rollback_from(state)
    }

    /// Diverts `state` to rollback and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError`] if the store fails.
    fn rollback_from(&self, state: RolloutState) -> Result<RolloutState, RolloutError> {
        let from_stage = state.stage;
        let rolled_back = rollback::rollback_state(&state, Timestamp::now());
        persist_rollout_state(self.store, &rolled_back)?;
        append_audit_entry(self.store, "rollback", from_stage, &rolled_back, Some(false))?;
        Ok(rolled_back)
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
    use revolve_store::FsArtifactStore;

    use super::*;

    fn thresholds() -> RolloutThresholds {
        RolloutThresholds { max_failure_rate: 0.2, min_success_uplift: 0.0, max_cost_increase: 0.05 }
    }

    fn kpi(success_rate: f64, avg_cost_usd: f64, failure_rate: f64) -> PolicyKpi {
        PolicyKpi { total_runs: 100, success_rate, avg_cost_usd, p95_latency_ms: 1000.0, failure_rate, evidence_pass_rate: 0.9 }
    }

    #[test]
    fn start_canary_then_advance_walks_canary_to_partial_to_full() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let manager = RolloutManager::new(&store);

        let state = manager
            .start_canary(PolicyId::new("policy-1"), PolicyId::new("policy-2"), thresholds(), 200)
            .expect("start_canary");
        assert_eq!(state.stage, RolloutStage::Canary);

        let active = kpi(0.9, 1.0, 0.1);
        let candidate = kpi(0.92, 1.0, 0.1);

        let partial = manager.advance_stage(&active, &candidate).expect("advance to partial");
        assert_eq!(partial.stage, RolloutStage::Partial);
        assert_eq!(partial.traffic_split.get("policy-2"), Some(&0.25));

        let full = manager.advance_stage(&active, &candidate).expect("advance to full");
        assert_eq!(full.stage, RolloutStage::Full);
        assert_eq!(full.active_policy.as_str(), "policy-2");
        assert!(full.candidate_policy.is_none());
    }

    #[test]
    fn advance_stage_rolls_back_on_failing_kpis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let manager = RolloutManager::new(&store);

        manager.start_canary(PolicyId::new("policy-1"), PolicyId::new("policy-2"), thresholds(), 200).expect("start_canary");

        let active = kpi(0.9, 1.0, 0.1);
        let candidate = kpi(0.5, 1.0, 0.6);
        let rolled_back = manager.advance_stage(&active, &candidate).expect("advance");
        assert_eq!(rolled_back.stage, RolloutStage::Rollback);
        assert_eq!(rolled_back.traffic_split.get("policy-1"), Some(&1.0));
    }

    #[test]
    fn advance_stage_refuses_when_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let manager = RolloutManager::new(&store);

        let active = kpi(0.9, 1.0, 0.1);
        let err = manager.advance_stage(&active, &active).expect_err("should refuse");
        assert!(matches!(err, RolloutError::Refused { .. }));
    }

    #[test]
    fn check_and_maybe_advance_or_rollback_is_noop_when_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let manager = RolloutManager::new(&store);

        let active = kpi(0.9, 1.0, 0.1);
        let result = manager.check_and_maybe_advance_or_rollback(&active, &active).expect("tick");
        assert!(result.is_none());
    }

    #[test]
    fn force_rollback_diverts_regardless_of_kpis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let manager = RolloutManager::new(&store);

        manager.start_canary(PolicyId::new("policy-1"), PolicyId::new("policy-2"), thresholds(), 200).expect("start_canary");
        let rolled_back = manager.force_rollback().expect("force_rollback");
        assert_eq!(rolled_back.stage, RolloutStage::Rollback);
        assert_eq!(rolled_back.traffic_split.get("policy-1"), Some(&1.0));
    }

    #[test]
    fn force_rollback_refuses_when_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let manager = RolloutManager::new(&store);
        assert!(matches!(manager.force_rollback(), Err(RolloutError::Refused { .. })));
    }

    #[test]
    fn reset_to_idle_clears_an_in_progress_rollout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let manager = RolloutManager::new(&store);

        manager.start_canary(PolicyId::new("policy-1"), PolicyId::new("policy-2"), thresholds(), 200).expect("start_canary");
        let state = manager.reset_to_idle(PolicyId::new("policy-1"), thresholds(), 200).expect("reset");
        assert_eq!(state.stage, RolloutStage::Idle);
        assert!(state.candidate_policy.is_none());
    }
}
