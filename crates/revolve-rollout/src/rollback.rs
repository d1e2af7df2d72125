// crates/revolve-rollout/src/rollback.rs
// ============================================================================
// Module: Rollback Manager (C14)
// Description: The rollback decision rule and the pure RolloutState
// transform it drives.
// Purpose: Divert a canary or partial rollout back to 100% active traffic
// the moment a candidate's KPIs cross a hard line.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! [`should_rollback`] is intentionally conservative: any one of its three
//! conditions firing is sufficient, there is no voting or hysteresis. The
//! caller (the Rollout Manager) is responsible for invoking
//! [`rollback_state`], persisting the result, and appending the audit
//! entry — this module never touches the store itself.

use std::collections::BTreeMap;

use revolve_core::PolicyKpi;
use revolve_core::RolloutStage;
use revolve_core::RolloutState;
use revolve_core::Timestamp;
use revolve_core::rollout::RolloutThresholds;

/// Fixed minimum success-rate drop (candidate below active) that forces a
/// rollback regardless of `thresholds.min_success_uplift`.
const MAX_SUCCESS_RATE_DROP: f64 = 0.05;

/// Returns `true` if any hard rollback condition holds between `active_kpi`
/// and `candidate_kpi` under `thresholds`:
/// - candidate failure rate exceeds `thresholds.max_failure_rate`,
/// - active success rate exceeds candidate's by more than 5 points, or
/// - candidate's average cost exceeds active's by more than
///   `thresholds.max_cost_increase` as a fraction of active's cost.
#[must_use]
pub fn should_rollback(active_kpi: &PolicyKpi, candidate_kpi: &PolicyKpi, thresholds: &RolloutThresholds) -> bool {
    if candidate_kpi.failure_rate > thresholds.max_failure_rate {
        return true;
    }
    if active_kpi.success_rate - candidate_kpi.success_rate > MAX_SUCCESS_RATE_DROP {
        return true;
    }
    if active_kpi.avg_cost_usd > 0.0 {
        let cost_increase = (candidate_kpi.avg_cost_usd - active_kpi.avg_cost_usd) / active_kpi.avg_cost_usd;
        if cost_increase > thresholds.max_cost_increase {
            return true;
        }
    }
    false
}

/// Builds the post-rollback `RolloutState`: all traffic reverts to
/// `state.active_policy`, the prior stage and split are preserved for
/// audit, and `candidate_policy` is cleared.
///
/// Does not persist; the caller writes the result through the Rollout
/// Manager's single-writer path.
#[must_use]
pub fn rollback_state(state: &RolloutState, now: Timestamp) -> RolloutState {
    let mut traffic_split = BTreeMap::new();
    traffic_split.insert(state.active_policy.as_str().to_string(), 1.0);

    RolloutState {
        schema_version: state.schema_version.clone(),
        active_policy: state.active_policy.clone(),
        candidate_policy: None,
        stage: RolloutStage::Rollback,
        traffic_split,
        thresholds: state.thresholds,
        kpi_window: state.kpi_window,
        started_at: state.started_at,
        last_checked_at: now,
        rollback_from_stage: Some(state.stage),
        rollback_from_split: Some(state.traffic_split.clone()),
        rollback_at: Some(now),
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
    use revolve_core::identifiers::PolicyId;

    use super::*;

    fn thresholds() -> RolloutThresholds {
        RolloutThresholds { max_failure_rate: 0.2, min_success_uplift: 0.0, max_cost_increase: 0.05 }
    }

    fn kpi(success_rate: f64, avg_cost_usd: f64, failure_rate: f64) -> PolicyKpi {
        PolicyKpi { total_runs: 100, success_rate, avg_cost_usd, p95_latency_ms: 1000.0, failure_rate, evidence_pass_rate: 0.9 }
    }

    #[test]
    fn rolls_back_on_high_failure_rate() {
        let active = kpi(0.9, 1.0, 0.1);
        let candidate = kpi(0.9, 1.0, 0.3);
        assert!(should_rollback(&active, &candidate, &thresholds()));
    }

    #[test]
    fn rolls_back_on_success_rate_drop() {
        let active = kpi(0.95, 1.0, 0.05);
        let candidate = kpi(0.85, 1.0, 0.05);
        assert!(should_rollback(&active, &candidate, &thresholds()));
    }

    #[test]
    fn rolls_back_on_cost_increase() {
        let active = kpi(0.9, 1.0, 0.1);
        let candidate = kpi(0.9, 1.2, 0.1);
        assert!(should_rollback(&active, &candidate, &thresholds()));
    }

    #[test]
    fn does_not_roll_back_within_thresholds() {
        let active = kpi(0.9, 1.0, 0.1);
        let candidate = kpi(0.91, 1.02, 0.1);
        assert!(!should_rollback(&active, &candidate, &thresholds()));
    }

    #[test]
    fn rollback_state_reverts_all_traffic_to_active() {
        let mut state = RolloutState::idle(PolicyId::new("policy-1"), thresholds(), 200, Timestamp::now());
        state.stage = RolloutStage::Canary;
        state.candidate_policy = Some(PolicyId::new("policy-2"));
        state.traffic_split.insert("policy-2".to_string(), 0.05);
        state.traffic_split.insert("policy-1".to_string(), 0.95);

        let rolled_back = rollback_state(&state, Timestamp::now());
        assert_eq!(rolled_back.stage, RolloutStage::Rollback);
        assert_eq!(rolled_back.traffic_split.get("policy-1"), Some(&1.0));
        assert!(rolled_back.candidate_policy.is_none());
        assert_eq!(rolled_back.rollback_from_stage, Some(RolloutStage::Canary));
    }
}
