// crates/revolve-rollout/src/router.rs
// ============================================================================
// Module: Policy Router (C12)
// Description: Stable-hash traffic split resolving a policy id for a given
// run context.
// Purpose: The only read path production traffic takes through this
// workspace; every other component here is reached offline.
// Dependencies: revolve-core, revolve-store
// ============================================================================

//! ## Overview
//! [`pick_policy`] never errors on a missing or malformed `RolloutState`;
//! both are treated as "no rollout in progress" and resolved via the
//! caller-supplied default-active resolver, per this workspace's absent/
//! malformed-artifact convention. Per the Open Question in the upstream
//! design notes, a run context with no stable identifier fails closed to
//! the active policy rather than falling back to a freshly generated,
//! unstable identifier — a random identifier would violate the "identical
//! context yields identical policy_id" guarantee this router exists to
//! provide.

use revolve_core::ArtifactStore;
use revolve_core::identifiers::PolicyId;
use revolve_core::identifiers::ProjectId;
use revolve_core::identifiers::RunId;
use revolve_core::identifiers::TaskId;
use revolve_core::identifiers::UserId;

use crate::error::RolloutError;
use crate::rollout::load_rollout_state;

// ============================================================================
// SECTION: RunContext
// ============================================================================

/// The subset of a run's identifying context the router can use to derive
/// a stable traffic-split hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    /// The external task identifier, highest priority.
    pub task_id: Option<TaskId>,
    /// The run identifier, second priority.
    pub run_id: Option<RunId>,
    /// The external project identifier, used alone or paired with `user_id`.
    pub project_id: Option<ProjectId>,
    /// The external user identifier, used paired with `project_id`.
    pub user_id: Option<UserId>,
}

/// Picks the first available stable field from `ctx` in priority order:
/// `task_id`, `run_id`, `(project_id, user_id)`, `project_id`. Returns
/// `None` if no stable field is present.
fn stable_key_for(ctx: &RunContext) -> Option<String> {
    if let Some(task_id) = &ctx.task_id {
        return Some(format!("task:{}", task_id.as_str()));
    }
    if let Some(run_id) = &ctx.run_id {
        return Some(format!("run:{}", run_id.as_str()));
    }
    if let (Some(project_id), Some(user_id)) = (&ctx.project_id, &ctx.user_id) {
        return Some(format!("project_user:{}:{}", project_id.as_str(), user_id.as_str()));
    }
    if let Some(project_id) = &ctx.project_id {
        return Some(format!("project:{}", project_id.as_str()));
    }
    None
}

/// Hashes `key` with SHA-256 and maps the first 8 bytes of the digest to a
/// deterministic fraction in `[0, 1)`.
fn stable_fraction(key: &str) -> f64 {
    let digest = revolve_core::hashing::hash_bytes(key.as_bytes());
    let prefix = &digest.value[0..16];
    let as_u64 = u64::from_str_radix(prefix, 16).unwrap_or(0);
    (as_u64 as f64) / 2f64.powi(64)
}

// ============================================================================
// SECTION: pick_policy
// ============================================================================

/// Resolves the policy id to use for `ctx`.
///
/// `active_override`, when set, short-circuits every other rule and is
/// returned unconditionally — this is the runtime effect of the router's
/// `active_policy_override` configuration knob, meant for an operator to
/// pin traffic to a single policy without touching the persisted
/// `RolloutState`.
///
/// Guarantee: for unchanged `RolloutState` and `active_override`, identical
/// `ctx` always yields an identical result, across processes and restarts.
///
/// # Errors
///
/// Returns [`RolloutError`] if the persisted `RolloutState` cannot be read.
pub fn pick_policy(
    store: &dyn ArtifactStore,
    ctx: &RunContext,
    active_override: Option<&PolicyId>,
    resolve_default_active: &dyn Fn() -> PolicyId,
) -> Result<PolicyId, RolloutError> {
    if let Some(override_policy) = active_override {
        return Ok(override_policy.clone());
    }

    let Some(state) = load_rollout_state(store)? else {
        return Ok(resolve_default_active());
    };

    if state.stage.routes_to_active_only() {
        return Ok(state.active_policy);
    }

    let Some(candidate) = state.candidate_policy.clone() else {
        return Ok(state.active_policy);
    };

    let Some(stable_key) = stable_key_for(ctx) else {
        tracing::warn!("pick_policy: run_context has no stable identifier; failing closed to active policy");
        return Ok(state.active_policy);
    };

    let fraction = stable_fraction(&stable_key);
    let candidate_split = state.traffic_split.get(candidate.as_str()).copied().unwrap_or(0.0);

    if fraction < candidate_split { Ok(candidate) } else { Ok(state.active_policy) }
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

    use revolve_core::RolloutStage;
    use revolve_core::RolloutState;
    use revolve_core::Timestamp;
    use revolve_core::rollout::RolloutThresholds;
    use revolve_store::FsArtifactStore;

    use super::*;
    use crate::rollout::persist_rollout_state;

    fn thresholds() -> RolloutThresholds {
        RolloutThresholds { max_failure_rate: 0.2, min_success_uplift: 0.0, max_cost_increase: 0.05 }
    }

    #[test]
    fn pick_policy_returns_default_active_when_state_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let policy =
            pick_policy(&store, &RunContext::default(), None, &|| PolicyId::new("policy-1")).expect("pick");
        assert_eq!(policy.as_str(), "policy-1");
    }

    #[test]
    fn pick_policy_is_stable_across_repeated_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let mut state = RolloutState::idle(PolicyId::new("policy-1"), thresholds(), 200, Timestamp::now());
        state.stage = RolloutStage::Canary;
        state.candidate_policy = Some(PolicyId::new("policy-2"));
        let mut split = BTreeMap::new();
        split.insert("policy-1".to_string(), 0.95);
        split.insert("policy-2".to_string(), 0.05);
        state.traffic_split = split;
        persist_rollout_state(&store, &state).expect("persist");

        let ctx = RunContext { task_id: Some(revolve_core::identifiers::TaskId::new("T_123")), ..RunContext::default() };
        let first = pick_policy(&store, &ctx, None, &|| PolicyId::new("policy-1")).expect("pick");
        for _ in 0..999 {
            let repeat = pick_policy(&store, &ctx, None, &|| PolicyId::new("policy-1")).expect("pick");
            assert_eq!(first, repeat);
        }
    }

    #[test]
    fn pick_policy_fails_closed_to_active_with_no_stable_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let mut state = RolloutState::idle(PolicyId::new("policy-1"), thresholds(), 200, Timestamp::now());
        state.stage = RolloutStage::Canary;
        state.candidate_policy = Some(PolicyId::new("policy-2"));
        persist_rollout_state(&store, &state).expect("persist");

        let policy =
            pick_policy(&store, &RunContext::default(), None, &|| PolicyId::new("policy-1")).expect("pick");
        assert_eq!(policy.as_str(), "policy-1");
    }

    #[test]
    fn pick_policy_honors_active_override_over_candidate_split() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let mut state = RolloutState::idle(PolicyId::new("policy-1"), thresholds(), 200, Timestamp::now());
        state.stage = RolloutStage::Full;
        state.candidate_policy = Some(PolicyId::new("policy-2"));
        let mut split = BTreeMap::new();
        split.insert("policy-2".to_string(), 1.0);
        state.traffic_split = split;
        persist_rollout_state(&store, &state).expect("persist");

        let ctx = RunContext { task_id: Some(revolve_core::identifiers::TaskId::new("T_123")), ..RunContext::default() };
        let overridden = PolicyId::new("policy-pinned");
        let policy = pick_policy(&store, &ctx, Some(&overridden), &|| PolicyId::new("policy-1")).expect("pick");
        assert_eq!(policy, overridden);
    }
}
