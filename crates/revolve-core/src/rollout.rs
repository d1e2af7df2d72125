// crates/revolve-core/src/rollout.rs
// ============================================================================
// Module: Revolve Rollout Model
// Description: The singleton record describing the current active/candidate
// traffic split.
// Purpose: Give the Policy Router (C12) a read contract and the Rollout
// Manager (C13) / Rollback Manager (C14) a single-writer record shape.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`RolloutState`] is a singleton: exactly one copy exists under
//! `rollouts/rollout_state.json`. Only the Learning Controller's periodic
//! tick or an administrative reset may write it; every other reader loads a
//! fresh, immutable snapshot per call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CoreError;
use crate::identifiers::PolicyId;
use crate::time::Timestamp;

/// Tolerance for the traffic-split normalization invariant.
pub const TRAFFIC_SPLIT_TOLERANCE: f64 = 1e-6;

// ============================================================================
// SECTION: Stage
// ============================================================================

/// The stage of the three-stage rollout state machine.
///
/// # Invariants
/// - Valid transitions are `idle -> canary -> partial -> full -> idle`, with
///   `canary` or `partial` able to divert to `rollback` at any check, and
///   `rollback` returning to `idle` only via an administrative reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStage {
    /// No rollout in progress; all traffic goes to the active policy.
    Idle,
    /// A candidate is receiving a small traffic fraction (default 5%).
    Canary,
    /// A candidate is receiving a larger traffic fraction (default 25%).
    Partial,
    /// A candidate has been promoted to receive all traffic.
    Full,
    /// A rollout was aborted; all traffic has reverted to the active policy.
    Rollback,
}

impl RolloutStage {
    /// Stages in which the Policy Router bypasses traffic splitting and
    /// returns the active policy directly.
    #[must_use]
    pub fn routes_to_active_only(self) -> bool {
        matches!(self, Self::Idle | Self::Full | Self::Rollback)
    }

    /// Stages in which the Rollout Manager's periodic tick is a no-op.
    #[must_use]
    pub fn tick_is_noop(self) -> bool {
        matches!(self, Self::Idle | Self::Full | Self::Rollback)
    }
}

// ============================================================================
// SECTION: Thresholds
// ============================================================================

/// The KPI thresholds a rollout's advance/rollback checks are evaluated
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RolloutThresholds {
    /// Maximum acceptable candidate failure rate.
    pub max_failure_rate: f64,
    /// Minimum required success-rate uplift of candidate over active.
    pub min_success_uplift: f64,
    /// Maximum acceptable fractional cost increase of candidate over active.
    pub max_cost_increase: f64,
}

// ============================================================================
// SECTION: RolloutState
// ============================================================================

/// The singleton rollout record.
///
/// # Invariants
/// - `traffic_split` values sum to `1 +/- `[`TRAFFIC_SPLIT_TOLERANCE`] at
///   every persisted state.
/// - Single-writer: only the Learning Controller's tick or an administrative
///   reset mutates this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    /// Schema version of this record.
    pub schema_version: String,
    /// The currently active policy.
    pub active_policy: PolicyId,
    /// The candidate policy under evaluation, when a rollout is in
    /// progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_policy: Option<PolicyId>,
    /// The current rollout stage.
    pub stage: RolloutStage,
    /// Traffic fractions keyed by policy id, summing to 1.
    pub traffic_split: BTreeMap<String, f64>,
    /// The KPI thresholds governing advance/rollback decisions.
    pub thresholds: RolloutThresholds,
    /// Number of recent runs considered in each KPI check.
    pub kpi_window: u32,
    /// When the current rollout (or idle period) began.
    pub started_at: Timestamp,
    /// When the rollout was last checked by a periodic tick.
    pub last_checked_at: Timestamp,
    /// The stage a rollback reverted from, when `stage` is `rollback`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from_stage: Option<RolloutStage>,
    /// The traffic split a rollback reverted from, when `stage` is
    /// `rollback`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from_split: Option<BTreeMap<String, f64>>,
    /// When the rollback occurred, when `stage` is `rollback`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_at: Option<Timestamp>,
}

impl RolloutState {
    /// Builds the idle state for a freshly resolved active policy, with no
    /// candidate and full traffic to the active policy.
    #[must_use]
    pub fn idle(active_policy: PolicyId, thresholds: RolloutThresholds, kpi_window: u32, now: Timestamp) -> Self {
        let mut traffic_split = BTreeMap::new();
        traffic_split.insert(active_policy.as_str().to_string(), 1.0);
        Self {
            schema_version: "1.0".to_string(),
            active_policy,
            candidate_policy: None,
            stage: RolloutStage::Idle,
            traffic_split,
            thresholds,
            kpi_window,
            started_at: now,
            last_checked_at: now,
            rollback_from_stage: None,
            rollback_from_split: None,
            rollback_at: None,
        }
    }

    /// Validates the traffic-split normalization invariant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TrafficSplitNotNormalized`] if the split values
    /// do not sum to 1 within [`TRAFFIC_SPLIT_TOLERANCE`].
    pub fn validate_traffic_split(&self) -> Result<(), CoreError> {
        let sum: f64 = self.traffic_split.values().sum();
        if (sum - 1.0).abs() > TRAFFIC_SPLIT_TOLERANCE {
            return Err(CoreError::TrafficSplitNotNormalized {
                actual: sum,
                tolerance: TRAFFIC_SPLIT_TOLERANCE,
            });
        }
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
    use super::*;

    fn thresholds() -> RolloutThresholds {
        RolloutThresholds {
            max_failure_rate: 0.2,
            min_success_uplift: 0.0,
            max_cost_increase: 0.05,
        }
    }

    #[test]
    fn idle_state_has_full_traffic_to_active() {
        let state = RolloutState::idle(PolicyId::new("policy-1"), thresholds(), 200, Timestamp::now());
        assert!(state.validate_traffic_split().is_ok());
        assert_eq!(state.stage, RolloutStage::Idle);
    }

    #[test]
    fn validate_traffic_split_rejects_bad_sum() {
        let mut state = RolloutState::idle(PolicyId::new("policy-1"), thresholds(), 200, Timestamp::now());
        state.traffic_split.insert("policy-2".to_string(), 0.5);
        assert!(state.validate_traffic_split().is_err());
    }

    #[test]
    fn idle_and_full_and_rollback_route_to_active_only() {
        assert!(RolloutStage::Idle.routes_to_active_only());
        assert!(RolloutStage::Full.routes_to_active_only());
        assert!(RolloutStage::Rollback.routes_to_active_only());
        assert!(!RolloutStage::Canary.routes_to_active_only());
        assert!(!RolloutStage::Partial.routes_to_active_only());
    }
}
