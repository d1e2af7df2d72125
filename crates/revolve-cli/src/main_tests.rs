// crates/revolve-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for file read size enforcement and outcome
// rendering in the CLI entry point.
// Dependencies: revolve-cli main helpers
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "test-only helpers may panic on unexpected input"
)]

use revolve_core::RolloutState;
use revolve_core::Timestamp;
use revolve_core::identifiers::PolicyId;
use revolve_core::rollout::RolloutThresholds;

use super::LearningOutcome;
use super::MAX_INPUT_BYTES;
use super::ReadLimitError;
use super::outcome_json;
use super::outcome_text;
use super::read_bytes_with_limit;

fn idle_state() -> RolloutState {
    let thresholds = RolloutThresholds { max_failure_rate: 0.15, min_success_uplift: 0.0, max_cost_increase: 0.05 };
    RolloutState::idle(PolicyId::new("policy-1"), thresholds, 200, Timestamp::now())
}

#[test]
fn read_bytes_with_limit_accepts_small_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("small.json");
    std::fs::write(&path, b"{}").expect("write");
    let bytes = read_bytes_with_limit(&path, MAX_INPUT_BYTES).expect("read");
    assert_eq!(bytes, b"{}");
}

#[test]
fn read_bytes_with_limit_refuses_oversized_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("big.json");
    std::fs::write(&path, vec![b'a'; 64]).expect("write");
    let err = read_bytes_with_limit(&path, 8).expect_err("should refuse");
    assert!(err.to_string().contains("exceeding"));
}

#[test]
fn read_limit_error_reports_size_and_limit() {
    let err = ReadLimitError::TooLarge { size: 100, limit: 10 };
    assert!(err.to_string().contains("100"));
    assert!(err.to_string().contains("10"));
}

#[test]
fn outcome_text_renders_each_variant() {
    let skipped = LearningOutcome::Skipped { reason: "no_trigger" };
    assert_eq!(outcome_text(&skipped), "skipped: no_trigger");

    let blocked = LearningOutcome::Blocked { policy_version: 3, reasons: vec!["cost_increase".to_string()] };
    assert!(outcome_text(&blocked).contains("blocked policy version 3"));

    let checked = LearningOutcome::RolloutChecked { state: idle_state() };
    assert!(outcome_text(&checked).contains("rollout checked"));
}

#[test]
fn outcome_json_round_trips_through_serde() {
    let outcome = LearningOutcome::SkippedIdenticalVersion { policy_version: 7 };
    let value = outcome_json(&outcome);
    assert_eq!(value["outcome"], "skipped_identical_version");
    assert_eq!(value["policy_version"], 7);
}
