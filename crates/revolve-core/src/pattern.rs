// crates/revolve-core/src/pattern.rs
// ============================================================================
// Module: Revolve Pattern Model
// Description: Execution pattern signatures and their rolling statistics.
// Purpose: Identify classes of execution behavior for cross-run learning,
// and track their rolling outcomes for Working Memory (C4).
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`PatternSignature`] identifies a class of run behavior — the same
//! tool sequence, planner choice, retrieval policy, evidence bucket, and
//! prompt template always hash to the same [`crate::identifiers::PatternKey`].
//! A [`PatternEntry`] is the rolling statistics record Working Memory keeps
//! per signature.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::hashing::HashingError;
use crate::hashing::inputs_hash;
use crate::identifiers::PatternKey;
use crate::identifiers::PromptTemplateId;
use crate::identifiers::RetrievalPolicyId;
use crate::identifiers::ToolChainId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Evidence count bucket
// ============================================================================

/// Buckets a raw evidence document count into a small number of classes so
/// pattern signatures do not explode in cardinality.
#[must_use]
pub fn evidence_count_bucket(doc_count: u32) -> &'static str {
    match doc_count {
        0 => "none",
        1..=2 => "low",
        3..=6 => "medium",
        _ => "high",
    }
}

// ============================================================================
// SECTION: PatternSignature
// ============================================================================

/// The structured inputs that identify an execution pattern.
///
/// # Invariants
/// - Equal field values always hash to the same
///   [`crate::identifiers::PatternKey`] via [`PatternSignature::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSignature {
    /// The ordered sequence of tool-chains invoked.
    pub tool_sequence: Vec<ToolChainId>,
    /// The planner choice (mode or named strategy) used.
    pub planner_choice: String,
    /// The retrieval policy used, when retrieval occurred.
    pub retrieval_policy_id: Option<RetrievalPolicyId>,
    /// The bucketed evidence document count.
    pub evidence_count_bucket: String,
    /// The prompt template used, when generation occurred.
    pub prompt_template_id: Option<PromptTemplateId>,
}

impl PatternSignature {
    /// Computes the stable [`PatternKey`] for this signature.
    ///
    /// # Errors
    ///
    /// Returns [`HashingError`] if the signature cannot be serialized.
    pub fn key(&self) -> Result<PatternKey, HashingError> {
        let digest = inputs_hash(self)?;
        Ok(PatternKey::new(digest))
    }
}

// ============================================================================
// SECTION: PatternEntry
// ============================================================================

/// Rolling statistics Working Memory keeps for one pattern signature.
///
/// # Invariants
/// - `decay_weight` is always in `(0, 1]`; entries with a weight below the
///   configured eviction threshold are removed, never persisted at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    /// Schema version of this record.
    pub schema_version: String,
    /// The pattern this entry tracks.
    pub pattern_key: PatternKey,
    /// Count of successful runs observed for this pattern.
    pub success_count: u64,
    /// Count of failed runs observed for this pattern.
    pub failure_count: u64,
    /// When this pattern was first observed.
    pub first_seen: Timestamp,
    /// When this pattern was last observed.
    pub last_seen: Timestamp,
    /// Multiplicative decay weight in `(0, 1]`.
    pub decay_weight: f64,
    /// Running average cost in US dollars.
    pub avg_cost_usd: f64,
    /// Running average latency in milliseconds.
    pub avg_latency_ms: f64,
}

impl PatternEntry {
    /// Creates a freshly observed entry with a full decay weight.
    #[must_use]
    pub fn new(pattern_key: PatternKey, now: Timestamp, success: bool, cost_usd: f64, latency_ms: f64) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            pattern_key,
            success_count: u64::from(success),
            failure_count: u64::from(!success),
            first_seen: now,
            last_seen: now,
            decay_weight: 1.0,
            avg_cost_usd: cost_usd,
            avg_latency_ms: latency_ms,
        }
    }

    /// Total observations recorded for this pattern.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success rate across all observations, `0.0` when there are none.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            return 0.0;
        }
        (self.success_count as f64) / (total as f64)
    }

    /// The ranking score `top_k_success` sorts by: success rate times decay
    /// weight.
    #[must_use]
    pub fn ranking_score(&self) -> f64 {
        self.success_rate() * self.decay_weight
    }

    /// Records a new observation: updates counts, running averages via
    /// `avg_new = avg_old + (x - avg_old) / n`, resets decay weight to 1.0,
    /// and bumps `last_seen`.
    pub fn record(&mut self, now: Timestamp, success: bool, cost_usd: f64, latency_ms: f64) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let n = self.total_count() as f64;
        self.avg_cost_usd += (cost_usd - self.avg_cost_usd) / n;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / n;
        self.decay_weight = 1.0;
        self.last_seen = now;
    }

    /// Applies one decay tick: multiplies `decay_weight` by `factor`.
    pub fn decay(&mut self, factor: f64) {
        self.decay_weight *= factor;
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
    fn evidence_count_bucket_classifies_boundaries() {
        assert_eq!(evidence_count_bucket(0), "none");
        assert_eq!(evidence_count_bucket(2), "low");
        assert_eq!(evidence_count_bucket(6), "medium");
        assert_eq!(evidence_count_bucket(7), "high");
    }

    #[test]
    fn pattern_signature_key_is_deterministic() {
        let signature = PatternSignature {
            tool_sequence: vec![ToolChainId::new("search")],
            planner_choice: "normal".to_string(),
            retrieval_policy_id: Some(RetrievalPolicyId::new("r1")),
            evidence_count_bucket: "low".to_string(),
            prompt_template_id: Some(PromptTemplateId::new("p1")),
        };
        let first = signature.key().expect("hash");
        let second = signature.key().expect("hash");
        assert_eq!(first, second);
    }

    #[test]
    fn pattern_entry_record_updates_running_average() {
        let now = Timestamp::now();
        let mut entry = PatternEntry::new(PatternKey::new("k1"), now, true, 1.0, 100.0);
        entry.record(now, true, 3.0, 300.0);
        assert_eq!(entry.success_count, 2);
        assert!((entry.avg_cost_usd - 2.0).abs() < 1e-9);
        assert!((entry.avg_latency_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn pattern_entry_decay_multiplies_weight() {
        let now = Timestamp::now();
        let mut entry = PatternEntry::new(PatternKey::new("k1"), now, true, 1.0, 100.0);
        entry.decay(0.95);
        entry.decay(0.95);
        assert!((entry.decay_weight - 0.95 * 0.95).abs() < 1e-9);
    }
}
