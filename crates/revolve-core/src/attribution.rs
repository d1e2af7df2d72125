// crates/revolve-core/src/attribution.rs
// ============================================================================
// Module: Revolve Attribution Model
// Description: The record assigning a primary cause and per-layer blame
// weights to a run.
// Purpose: Give the Decision Attributor (C5) a validated output type and
// every downstream consumer (C6, C8) a stable read contract.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An [`Attribution`] is produced for every run, failed or not. Successful
//! runs emit a neutral attribution with `failure=false`,
//! `primary_cause=Unknown`, and `confidence=0.0`; this module enforces that
//! pairing and the weight-normalization invariant at construction time
//! rather than leaving it to callers to remember.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CoreError;
use crate::identifiers::RunId;
use crate::time::Timestamp;

/// Tolerance for the layer-blame-weight normalization invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

// ============================================================================
// SECTION: Failure cause
// ============================================================================

/// The closed set of causes a run's outcome can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
    /// A tool call exceeded its timeout or otherwise blocked progress.
    ToolTimeout,
    /// Retrieval returned insufficient or irrelevant evidence.
    RetrievalMiss,
    /// The prompt template was a poor fit for the task.
    PromptMismatch,
    /// The planner chose a degraded or otherwise faulty path.
    PlannerError,
    /// Evidence was present but insufficient to support a decision.
    EvidenceInsufficient,
    /// The generation layer produced an unsupported or hallucinated answer.
    GenerationHallucination,
    /// An external environment fault (not attributable to any layer above).
    EnvironmentError,
    /// No cause could be determined, or the run did not fail.
    Unknown,
}

// ============================================================================
// SECTION: Attribution
// ============================================================================

/// A causal attribution for one run's outcome.
///
/// # Invariants
/// - `layer_blame_weights` values sum to `1.0 +/- `[`WEIGHT_SUM_TOLERANCE`]`
///   across non-excluded layers.
/// - `confidence` lies in `[0, 1]`.
/// - If `failure` is `false`, `confidence` is `0.0` and `primary_cause` is
///   [`FailureCause::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// Schema version of this record.
    pub schema_version: String,
    /// The run this attribution covers.
    pub run_id: RunId,
    /// Whether the run is treated as a failure for attribution purposes.
    pub failure: bool,
    /// The dominant cause of the run's outcome.
    pub primary_cause: FailureCause,
    /// The layer most responsible (e.g., `"retrieval"`, `"tools"`).
    pub primary_layer: String,
    /// Confidence in `primary_cause`, in `[0, 1]`.
    pub confidence: f64,
    /// Per-layer blame weights, summing to 1 across non-excluded layers.
    pub layer_blame_weights: BTreeMap<String, f64>,
    /// Layers excluded from scoring because they had no evidence.
    pub excluded_layers: Vec<String>,
    /// Free-text descriptions of the signals that drove this attribution.
    pub supporting_signals: Vec<String>,
    /// When this attribution was produced.
    pub generated_at: Timestamp,
}

impl Attribution {
    /// Builds and validates an [`Attribution`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WeightsNotNormalized`] if `layer_blame_weights`
    /// does not sum to 1 within [`WEIGHT_SUM_TOLERANCE`], or
    /// [`CoreError::OutOfRange`] if `confidence` is outside `[0, 1]`.
    #[allow(clippy::too_many_arguments, reason = "mirrors the full record shape")]
    pub fn new(
        run_id: RunId,
        failure: bool,
        primary_cause: FailureCause,
        primary_layer: impl Into<String>,
        confidence: f64,
        layer_blame_weights: BTreeMap<String, f64>,
        excluded_layers: Vec<String>,
        supporting_signals: Vec<String>,
        generated_at: Timestamp,
    ) -> Result<Self, CoreError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::OutOfRange {
                field: "confidence",
                lo: 0.0,
                hi: 1.0,
                actual: confidence,
            });
        }
        let weight_sum: f64 = layer_blame_weights.values().sum();
        if !layer_blame_weights.is_empty() && (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CoreError::WeightsNotNormalized {
                actual: weight_sum,
                tolerance: WEIGHT_SUM_TOLERANCE,
            });
        }
        let (primary_cause, confidence) = if failure {
            (primary_cause, confidence)
        } else {
            (FailureCause::Unknown, 0.0)
        };
        Ok(Self {
            schema_version: "1.0".to_string(),
            run_id,
            failure,
            primary_cause,
            primary_layer: primary_layer.into(),
            confidence,
            layer_blame_weights,
            excluded_layers,
            supporting_signals,
            generated_at,
        })
    }

    /// Builds the neutral attribution emitted for a successful run.
    #[must_use]
    pub fn neutral(run_id: RunId, generated_at: Timestamp) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            run_id,
            failure: false,
            primary_cause: FailureCause::Unknown,
            primary_layer: String::new(),
            confidence: 0.0,
            layer_blame_weights: BTreeMap::new(),
            excluded_layers: Vec::new(),
            supporting_signals: Vec::new(),
            generated_at,
        }
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
    fn neutral_attribution_has_zero_confidence_and_unknown_cause() {
        let attribution = Attribution::neutral(RunId::new("run-1"), Timestamp::now());
        assert!(!attribution.failure);
        assert_eq!(attribution.primary_cause, FailureCause::Unknown);
        assert!((attribution.confidence - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn new_rejects_unnormalized_weights() {
        let mut weights = BTreeMap::new();
        weights.insert("retrieval".to_string(), 0.9);
        let result = Attribution::new(
            RunId::new("run-1"),
            true,
            FailureCause::RetrievalMiss,
            "retrieval",
            0.8,
            weights,
            vec![],
            vec![],
            Timestamp::now(),
        );
        assert!(matches!(result, Err(CoreError::WeightsNotNormalized { .. })));
    }

    #[test]
    fn new_accepts_weights_within_tolerance() {
        let mut weights = BTreeMap::new();
        weights.insert("retrieval".to_string(), 0.995);
        let result = Attribution::new(
            RunId::new("run-1"),
            true,
            FailureCause::RetrievalMiss,
            "retrieval",
            0.8,
            weights,
            vec![],
            vec![],
            Timestamp::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn non_failure_forces_unknown_cause_and_zero_confidence() {
        let attribution = Attribution::new(
            RunId::new("run-1"),
            false,
            FailureCause::ToolTimeout,
            "tools",
            0.9,
            BTreeMap::new(),
            vec![],
            vec![],
            Timestamp::now(),
        )
        .expect("valid attribution");
        assert_eq!(attribution.primary_cause, FailureCause::Unknown);
        assert!((attribution.confidence - 0.0).abs() < f64::EPSILON);
    }
}
