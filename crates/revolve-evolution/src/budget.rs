// crates/revolve-evolution/src/budget.rs
// ============================================================================
// Module: Failure Budget (C7)
// Description: A persisted, single-writer-per-instance wrapper around
// FailureBudgetState.
// Purpose: Gate the Exploration Engine's spawning of candidate policies.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! [`FailureBudget`] is advisory, not a safety mechanism: the production
//! path is never affected by `hard_stop`, only exploration is. Callers
//! coordinate `can_spend` and `spend` as a logical pair; double-spending
//! across concurrent callers is tolerated by design.

use revolve_core::ArtifactStore;
use revolve_core::FailureBudgetState;

use crate::error::EvolutionError;

const BUDGET_KEY: &str = "exploration/budget_state.json";

/// A [`FailureBudgetState`] bound to a store for load/persist.
pub struct FailureBudget<'store> {
    store: &'store dyn ArtifactStore,
    state: FailureBudgetState,
}

impl<'store> FailureBudget<'store> {
    /// Loads the budget from `store`, or initializes it with the given caps
    /// if none has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError`] if a persisted budget exists but cannot
    /// be read.
    pub fn load(
        store: &'store dyn ArtifactStore,
        initial_failures: u32,
        initial_cost_usd: f64,
        initial_latency_ms: u64,
    ) -> Result<Self, EvolutionError> {
        let state = match store.get(BUDGET_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => FailureBudgetState::new(initial_failures, initial_cost_usd, initial_latency_ms),
        };
        Ok(Self { store, state })
    }

    /// The current budget snapshot.
    #[must_use]
    pub fn state(&self) -> &FailureBudgetState {
        &self.state
    }

    /// See [`FailureBudgetState::can_spend`].
    #[must_use]
    pub fn can_spend(&self, failures: u32, cost_usd: f64, latency_ms: u64) -> bool {
        self.state.can_spend(failures, cost_usd, latency_ms)
    }

    /// Spends the requested amounts and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError`] if the write fails.
    pub fn spend(&mut self, failures: u32, cost_usd: f64, latency_ms: u64) -> Result<(), EvolutionError> {
        self.state.spend(failures, cost_usd, latency_ms);
        self.persist()
    }

    /// Sets a hard-stop with a named reason (e.g. an external
    /// circuit-breaker) and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError`] if the write fails.
    pub fn set_hard_stop(&mut self, reason: impl Into<String>) -> Result<(), EvolutionError> {
        self.state.set_hard_stop(reason);
        self.persist()
    }

    /// Resets the budget to its initial caps and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError`] if the write fails.
    pub fn reset(&mut self) -> Result<(), EvolutionError> {
        self.state.reset();
        self.persist()
    }

    fn persist(&self) -> Result<(), EvolutionError> {
        let bytes = serde_json::to_vec(&self.state)?;
        self.store.put(BUDGET_KEY, &bytes)?;
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
    use revolve_store::FsArtifactStore;

    use super::*;

    #[test]
    fn load_then_persist_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let mut budget = FailureBudget::load(&store, 10, 5.0, 20_000).expect("load");
        budget.spend(1, 0.1, 100).expect("spend");

        let reloaded = FailureBudget::load(&store, 10, 5.0, 20_000).expect("reload");
        assert_eq!(reloaded.state().remaining_failures, 9);
    }

    #[test]
    fn exhausted_budget_blocks_can_spend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let mut budget = FailureBudget::load(&store, 0, 5.0, 20_000).expect("load");
        budget.spend(1, 0.0, 0).expect("spend");
        assert!(!budget.can_spend(0, 0.0, 0));
    }
}
