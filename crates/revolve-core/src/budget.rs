// crates/revolve-core/src/budget.rs
// ============================================================================
// Module: Revolve Failure Budget Model
// Description: The rolling-window budget gating exploration.
// Purpose: Give the Failure Budget (C7) a single data-plus-behavior record
// that the Exploration Engine (C8) checks before spawning candidates.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`FailureBudgetState`] is a soft sandbox limit, not a safety mechanism:
//! callers are expected to pair `can_spend` and `spend` as a logical unit,
//! but double-spending across concurrent callers is tolerated by design
//! (see the concurrency notes in `revolve_evolution::budget`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: FailureBudgetState
// ============================================================================

/// Rolling-window budget of failures, cost, and latency available to
/// exploration before a hard-stop fires.
///
/// # Invariants
/// - While `hard_stop` is set, `can_spend` always returns `false` regardless
///   of remaining amounts.
/// - `spend` never drives any `remaining_*` field negative; instead it sets
///   `hard_stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureBudgetState {
    /// Schema version of this record.
    pub schema_version: String,
    /// The configured failure cap for a full window.
    pub initial_failures: u32,
    /// The configured cost cap (US dollars) for a full window.
    pub initial_cost_usd: f64,
    /// The configured latency cap (milliseconds) for a full window.
    pub initial_latency_ms: u64,
    /// Remaining failure allowance.
    pub remaining_failures: u32,
    /// Remaining cost allowance, in US dollars.
    pub remaining_cost_usd: f64,
    /// Remaining latency allowance, in milliseconds.
    pub remaining_latency_ms: u64,
    /// Total failures spent since the last reset.
    pub spent_failures: u32,
    /// Total cost spent since the last reset, in US dollars.
    pub spent_cost_usd: f64,
    /// Total latency spent since the last reset, in milliseconds.
    pub spent_latency_ms: u64,
    /// Whether exploration is currently blocked.
    pub hard_stop: bool,
    /// The reason the most recent hard-stop was set, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stop_reason: Option<String>,
}

impl FailureBudgetState {
    /// Builds a freshly reset budget with the given window caps.
    #[must_use]
    pub fn new(initial_failures: u32, initial_cost_usd: f64, initial_latency_ms: u64) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            initial_failures,
            initial_cost_usd,
            initial_latency_ms,
            remaining_failures: initial_failures,
            remaining_cost_usd: initial_cost_usd,
            remaining_latency_ms: initial_latency_ms,
            spent_failures: 0,
            spent_cost_usd: 0.0,
            spent_latency_ms: 0,
            hard_stop: false,
            last_stop_reason: None,
        }
    }

    /// Returns whether the requested amounts can be spent: `false` if
    /// `hard_stop` is set or any remaining amount is less than requested.
    #[must_use]
    pub fn can_spend(&self, failures: u32, cost_usd: f64, latency_ms: u64) -> bool {
        if self.hard_stop {
            return false;
        }
        self.remaining_failures >= failures
            && self.remaining_cost_usd >= cost_usd
            && self.remaining_latency_ms >= latency_ms
    }

    /// Spends the requested amounts. If not allowed, sets `hard_stop=true`
    /// with reason `"budget_exhausted"` and leaves remaining amounts
    /// untouched; otherwise subtracts and accumulates the spent totals.
    pub fn spend(&mut self, failures: u32, cost_usd: f64, latency_ms: u64) {
        if !self.can_spend(failures, cost_usd, latency_ms) {
            self.set_hard_stop("budget_exhausted");
            return;
        }
        self.remaining_failures -= failures;
        self.remaining_cost_usd -= cost_usd;
        self.remaining_latency_ms -= latency_ms;
        self.spent_failures += failures;
        self.spent_cost_usd += cost_usd;
        self.spent_latency_ms += latency_ms;
    }

    /// Sets `hard_stop` with a named reason, e.g. from an external
    /// circuit-breaker check.
    pub fn set_hard_stop(&mut self, reason: impl Into<String>) {
        self.hard_stop = true;
        self.last_stop_reason = Some(reason.into());
    }

    /// Restores the budget to its initial, unspent state and clears
    /// `hard_stop`.
    pub fn reset(&mut self) {
        self.remaining_failures = self.initial_failures;
        self.remaining_cost_usd = self.initial_cost_usd;
        self.remaining_latency_ms = self.initial_latency_ms;
        self.spent_failures = 0;
        self.spent_cost_usd = 0.0;
        self.spent_latency_ms = 0;
        self.hard_stop = false;
        self.last_stop_reason = None;
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

    #[test]
    fn spend_within_budget_decrements_remaining() {
        let mut budget = FailureBudgetState::new(10, 5.0, 20_000);
        budget.spend(1, 0.5, 1000);
        assert_eq!(budget.remaining_failures, 9);
        assert!((budget.remaining_cost_usd - 4.5).abs() < f64::EPSILON);
        assert!(!budget.hard_stop);
    }

    #[test]
    fn spend_beyond_budget_sets_hard_stop() {
        let mut budget = FailureBudgetState::new(0, 5.0, 20_000);
        budget.spend(1, 0.0, 0);
        assert!(budget.hard_stop);
        assert_eq!(budget.last_stop_reason.as_deref(), Some("budget_exhausted"));
        assert_eq!(budget.remaining_failures, 0);
    }

    #[test]
    fn can_spend_is_false_once_hard_stopped_even_with_remaining() {
        let mut budget = FailureBudgetState::new(10, 5.0, 20_000);
        budget.set_hard_stop("circuit_breaker");
        assert!(!budget.can_spend(1, 0.1, 100));
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut budget = FailureBudgetState::new(10, 5.0, 20_000);
        budget.spend(5, 2.0, 1000);
        budget.reset();
        assert_eq!(budget.remaining_failures, 10);
        assert!(!budget.hard_stop);
        assert_eq!(budget.spent_failures, 0);
    }
}
