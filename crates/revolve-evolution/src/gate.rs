// crates/revolve-evolution/src/gate.rs
// ============================================================================
// Module: A/B Gate (C11)
// Description: Deterministic AND over four checks evaluated against a
// ShadowEvalReport.
// Purpose: Decide whether a candidate that has already passed regression is
// safe to hand to the Rollout Manager.
// Dependencies: revolve-core
// ============================================================================

//! ## Overview
//! The gate is a pure function over a [`ShadowEvalReport`] and a set of
//! thresholds; it performs no I/O and is not itself persisted as an
//! artifact — the Learning Controller records its outcome in the rollout
//! audit log. Cost and latency checks are evaluated as fractional
//! increases; when the active-side denominator is zero, the ratio is
//! taken to be `0.0` if the numerator is non-positive, else `1.0`, per the
//! zero-denominator convention this workspace uses throughout.

use std::collections::BTreeMap;

use revolve_core::CandidateId;
use revolve_core::GateCheck;
use revolve_core::GateDecision;
use revolve_core::ShadowEvalReport;
use revolve_core::Timestamp;
use revolve_core::hashing::inputs_hash;

use crate::error::EvolutionError;

// ============================================================================
// SECTION: Thresholds
// ============================================================================

/// The thresholds each A/B gate check is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct GateThresholds {
    /// Minimum required absolute success-rate uplift of candidate over
    /// active.
    pub min_success_uplift: f64,
    /// Maximum acceptable fractional cost increase of candidate over
    /// active.
    pub max_cost_increase: f64,
    /// Maximum acceptable fractional p95-latency increase of candidate
    /// over active.
    pub max_latency_increase_p95: f64,
    /// Minimum required candidate evidence pass rate.
    pub min_evidence_pass_rate: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self { min_success_uplift: 0.0, max_cost_increase: 0.05, max_latency_increase_p95: 0.10, min_evidence_pass_rate: 0.90 }
    }
}

/// Ratio of `numerator` over `denominator`, with the zero-denominator
/// convention: `0.0` if `numerator <= 0.0`, else `1.0`.
fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator <= 0.0 { 0.0 } else { 1.0 }
    } else {
        numerator / denominator
    }
}

// ============================================================================
// SECTION: evaluate_gate
// ============================================================================

/// Evaluates the four-check A/B gate over `report`.
///
/// # Errors
///
/// Returns [`EvolutionError`] if the decision's inputs cannot be hashed.
pub fn evaluate_gate(report: &ShadowEvalReport, thresholds: GateThresholds) -> Result<GateDecision, EvolutionError> {
    let success_delta = report.candidate.success_rate - report.active.success_rate;
    let success_check = GateCheck {
        observed: success_delta,
        threshold: thresholds.min_success_uplift,
        passed: success_delta >= thresholds.min_success_uplift,
    };

    let cost_ratio = safe_ratio(report.candidate.avg_cost_usd - report.active.avg_cost_usd, report.active.avg_cost_usd);
    let cost_check =
        GateCheck { observed: cost_ratio, threshold: thresholds.max_cost_increase, passed: cost_ratio <= thresholds.max_cost_increase };

    let latency_ratio =
        safe_ratio(report.candidate.p95_latency_ms - report.active.p95_latency_ms, report.active.p95_latency_ms);
    let latency_check = GateCheck {
        observed: latency_ratio,
        threshold: thresholds.max_latency_increase_p95,
        passed: latency_ratio <= thresholds.max_latency_increase_p95,
    };

    let evidence_check = GateCheck {
        observed: report.candidate.evidence_pass_rate,
        threshold: thresholds.min_evidence_pass_rate,
        passed: report.candidate.evidence_pass_rate >= thresholds.min_evidence_pass_rate,
    };

    let mut checks = BTreeMap::new();
    checks.insert("success".to_string(), success_check);
    checks.insert("cost".to_string(), cost_check);
    checks.insert("latency".to_string(), latency_check);
    checks.insert("evidence".to_string(), evidence_check);

    let mut reasons = Vec::new();
    let mut blocked_reasons = Vec::new();
    for (name, check) in &checks {
        let reason = format!("{name}: observed={:.4} threshold={:.4} passed={}", check.observed, check.threshold, check.passed);
        if !check.passed {
            blocked_reasons.push(format!("{name}_increase_or_shortfall: {reason}"));
        }
        reasons.push(reason);
    }

    let gate_pass = checks.values().all(|check| check.passed);
    let inputs_hash = inputs_hash(&(report, thresholds))?;

    Ok(GateDecision {
        schema_version: "1.0".to_string(),
        candidate_id: report.candidate_id.clone(),
        inputs_hash,
        gate_pass,
        reasons,
        blocked_reasons,
        checks,
        generated_at: Timestamp::now(),
    })
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
    use revolve_core::AggregateKpis;

    use super::*;

    fn report(active: AggregateKpis, candidate: AggregateKpis) -> ShadowEvalReport {
        ShadowEvalReport {
            schema_version: "1.0".to_string(),
            candidate_id: CandidateId::new("cand-1"),
            inputs_hash: "hash".to_string(),
            replay_count: 100,
            active,
            candidate,
            generated_at: Timestamp::now(),
        }
    }

    #[test]
    fn gate_blocks_on_latency_regression() {
        let active =
            AggregateKpis { success_rate: 0.90, avg_cost_usd: 0.05, p95_latency_ms: 1000.0, evidence_pass_rate: 0.95 };
        let candidate =
            AggregateKpis { success_rate: 0.92, avg_cost_usd: 0.051, p95_latency_ms: 1200.0, evidence_pass_rate: 0.95 };
        let decision = evaluate_gate(&report(active, candidate), GateThresholds::default()).expect("gate");

        assert!(!decision.gate_pass);
        assert!(decision.blocked_reasons.iter().any(|r| r.starts_with("latency_increase_or_shortfall")));
    }

    #[test]
    fn gate_passes_when_all_checks_hold() {
        let active =
            AggregateKpis { success_rate: 0.90, avg_cost_usd: 0.05, p95_latency_ms: 1000.0, evidence_pass_rate: 0.95 };
        let candidate =
            AggregateKpis { success_rate: 0.95, avg_cost_usd: 0.05, p95_latency_ms: 1000.0, evidence_pass_rate: 0.95 };
        let decision = evaluate_gate(&report(active, candidate), GateThresholds::default()).expect("gate");

        assert!(decision.gate_pass);
        assert!(decision.blocked_reasons.is_empty());
    }

    #[test]
    fn zero_denominator_cost_check_treats_nonpositive_delta_as_passing() {
        let active = AggregateKpis { success_rate: 0.90, avg_cost_usd: 0.0, p95_latency_ms: 1000.0, evidence_pass_rate: 0.95 };
        let candidate = AggregateKpis { success_rate: 0.95, avg_cost_usd: 0.0, p95_latency_ms: 1000.0, evidence_pass_rate: 0.95 };
        let decision = evaluate_gate(&report(active, candidate), GateThresholds::default()).expect("gate");
        assert!(decision.checks.get("cost").is_some_and(|check| check.passed));
    }
}
