// crates/revolve-runtime/src/working_memory.rs
// ============================================================================
// Module: Working Memory (C4)
// Description: In-memory pattern-entry map with a single-file snapshot.
// Purpose: Track rolling success/failure statistics per execution pattern
// for Decision Attribution (C5) and Exploration (C8).
// Dependencies: revolve-core, tracing
// ============================================================================

//! ## Overview
//! [`WorkingMemory`] holds every [`PatternEntry`] in memory behind a single
//! mutex, so all updates are totally ordered, and persists the whole map as
//! one snapshot file on each update. There is no partial-write path: a
//! snapshot read either sees the map before or after an update, never a
//! torn intermediate state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use revolve_core::ArtifactStore;
use revolve_core::PatternEntry;
use revolve_core::identifiers::PatternKey;

use crate::error::RuntimeError;

const SNAPSHOT_KEY: &str = "working_memory.json";
const DEFAULT_DECAY_FACTOR: f64 = 0.95;

// ============================================================================
// SECTION: WorkingMemory
// ============================================================================

/// A persisted, mutex-serialized map from pattern key to rolling entry.
///
/// # Invariants
/// - All updates are totally ordered by a single internal mutex.
/// - The on-disk snapshot is fully rewritten, atomically, on every update.
pub struct WorkingMemory<'store> {
    store: &'store dyn ArtifactStore,
    max_patterns: usize,
    entries: Mutex<BTreeMap<PatternKey, PatternEntry>>,
}

impl<'store> WorkingMemory<'store> {
    /// Loads the working memory snapshot from `store`, or starts empty if
    /// none has ever been written.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the snapshot exists but cannot be read.
    pub fn load(store: &'store dyn ArtifactStore, max_patterns: usize) -> Result<Self, RuntimeError> {
        let entries = match store.get(SNAPSHOT_KEY)? {
            Some(bytes) => serde_json::from_slice::<BTreeMap<PatternKey, PatternEntry>>(&bytes)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            store,
            max_patterns,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<PatternKey, PatternEntry>) -> Result<(), RuntimeError> {
        let bytes = serde_json::to_vec(entries)?;
        self.store.put(SNAPSHOT_KEY, &bytes)?;
        Ok(())
    }

    /// Looks up the current entry for `key`, without mutating anything.
    #[must_use]
    pub fn get(&self, key: &PatternKey) -> Option<PatternEntry> {
        let guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(key).cloned()
    }

    /// Creates or updates the entry for `key`: resets its decay weight to
    /// 1.0 and folds in the new observation via a running average.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the updated snapshot cannot be persisted.
    pub fn record(
        &self,
        key: PatternKey,
        now: revolve_core::Timestamp,
        success: bool,
        cost_usd: f64,
        latency_ms: f64,
    ) -> Result<(), RuntimeError> {
        let mut guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .entry(key.clone())
            .and_modify(|entry| entry.record(now, success, cost_usd, latency_ms))
            .or_insert_with(|| PatternEntry::new(key, now, success, cost_usd, latency_ms));
        if guard.len() > self.max_patterns {
            evict_lowest_weight(&mut guard, self.max_patterns);
        }
        self.persist(&guard)
    }

    /// Applies one decay tick to every entry: multiplies `decay_weight` by
    /// `factor` (default [`DEFAULT_DECAY_FACTOR`]) and evicts entries whose
    /// weight falls below `threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the updated snapshot cannot be persisted.
    pub fn decay(&self, factor: Option<f64>, threshold: f64) -> Result<(), RuntimeError> {
        let factor = factor.unwrap_or(DEFAULT_DECAY_FACTOR);
        let mut guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for entry in guard.values_mut() {
            entry.decay(factor);
        }
        guard.retain(|_, entry| entry.decay_weight >= threshold);
        self.persist(&guard)
    }

    /// Returns the `k` entries maximizing `success_rate * decay_weight`.
    #[must_use]
    pub fn top_k_success(&self, k: usize) -> Vec<PatternEntry> {
        let guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries: Vec<PatternEntry> = guard.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.ranking_score()
                .partial_cmp(&a.ranking_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(k);
        entries
    }

    /// Current number of tracked patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        let guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.len()
    }

    /// Whether no patterns are currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_lowest_weight(entries: &mut BTreeMap<PatternKey, PatternEntry>, max_patterns: usize) {
    while entries.len() > max_patterns {
        let Some(lowest_key) = entries
            .iter()
            .min_by(|a, b| {
                a.1.ranking_score()
                    .partial_cmp(&b.1.ranking_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(key, _)| key.clone())
        else {
            break;
        };
        entries.remove(&lowest_key);
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
    use revolve_core::Timestamp;
    use revolve_store::FsArtifactStore;

    use super::*;

    #[test]
    fn record_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let memory = WorkingMemory::load(&store, 100).expect("load");
        let key = PatternKey::new("pattern-1");
        memory.record(key.clone(), Timestamp::now(), true, 0.1, 100.0).expect("record");
        assert_eq!(memory.len(), 1);

        let reloaded = WorkingMemory::load(&store, 100).expect("reload");
        assert!(reloaded.get(&key).is_some());
    }

    #[test]
    fn decay_k_times_multiplies_weight_by_factor_to_the_k() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let memory = WorkingMemory::load(&store, 100).expect("load");
        let key = PatternKey::new("pattern-1");
        memory.record(key.clone(), Timestamp::now(), true, 0.1, 100.0).expect("record");

        memory.decay(Some(0.9), 0.0).expect("decay 1");
        memory.decay(Some(0.9), 0.0).expect("decay 2");
        memory.decay(Some(0.9), 0.0).expect("decay 3");

        let entry = memory.get(&key).expect("present");
        assert!((entry.decay_weight - 0.9_f64.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn decay_evicts_entries_below_threshold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let memory = WorkingMemory::load(&store, 100).expect("load");
        memory
            .record(PatternKey::new("pattern-1"), Timestamp::now(), true, 0.1, 100.0)
            .expect("record");
        memory.decay(Some(0.1), 0.5).expect("decay");
        assert!(memory.is_empty());
    }

    #[test]
    fn top_k_success_orders_by_success_rate_times_decay_weight() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let memory = WorkingMemory::load(&store, 100).expect("load");
        memory
            .record(PatternKey::new("low"), Timestamp::now(), false, 0.1, 100.0)
            .expect("record");
        memory
            .record(PatternKey::new("high"), Timestamp::now(), true, 0.1, 100.0)
            .expect("record");

        let top = memory.top_k_success(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].pattern_key, PatternKey::new("high"));
    }
}
