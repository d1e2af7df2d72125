// crates/revolve-core/src/event.rs
// ============================================================================
// Module: Revolve Event Model
// Description: Append-only per-run event records.
// Purpose: Represent one entry in a run's event log, as written and read by
// the Trace Store.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Events are appended one per line to a run's event log and are never
//! rewritten. `event_id` is monotonically increasing and strictly ordered
//! within a single run; cross-run ordering carries no meaning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::RunId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Event type
// ============================================================================

/// The closed set of event kinds a run may emit.
///
/// # Invariants
/// - Closed enum; unknown wire values fail to deserialize rather than being
///   silently coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An agent emitted a report of its own progress or findings.
    AgentReport,
    /// A governance layer made an explicit decision (e.g., approve a step).
    GovernanceDecision,
    /// Execution switched plan paths (e.g., normal to degraded).
    PlanSwitch,
    /// A tool was invoked.
    ToolCall,
    /// The run's overall state transitioned.
    StateChange,
    /// A cost accounting update was recorded.
    CostUpdate,
    /// Feedback from an evaluator was attached to the run.
    EvaluationFeedback,
}

// ============================================================================
// SECTION: Payload
// ============================================================================

/// The body of an event: either inline (small) or a reference to a blob
/// stored alongside the event log (large).
///
/// # Invariants
/// - Exactly one of the two forms is present; this is enforced by the enum
///   shape rather than by runtime checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// A small payload carried inline in the event record.
    Inline {
        /// The inline JSON value.
        value: serde_json::Value,
    },
    /// A reference to a large payload stored as a blob.
    Ref {
        /// The blob key the payload is stored under.
        blob_key: String,
    },
}

// ============================================================================
// SECTION: Event
// ============================================================================

/// One append-only entry in a run's event log.
///
/// # Invariants
/// - `event_id` is monotonically increasing and strictly ordered within a
///   single `run_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Schema version of this record.
    pub schema_version: String,
    /// Monotone event ordinal within `run_id`, starting at 0.
    pub event_id: u64,
    /// The run this event belongs to.
    pub run_id: RunId,
    /// When the event was recorded.
    pub timestamp: Timestamp,
    /// The event's kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The event body.
    pub payload: EventPayload,
    /// Forward-compatible extension bag.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Builds a new event with an empty `extras` bag.
    #[must_use]
    pub fn new(
        event_id: u64,
        run_id: RunId,
        timestamp: Timestamp,
        event_type: EventType,
        payload: EventPayload,
    ) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            event_id,
            run_id,
            timestamp,
            event_type,
            payload,
            extras: serde_json::Map::new(),
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
    fn event_round_trips_through_json() {
        let event = Event::new(
            0,
            RunId::new("run-1"),
            Timestamp::now(),
            EventType::ToolCall,
            EventPayload::Inline {
                value: serde_json::json!({"tool": "search"}),
            },
        );
        let bytes = serde_json::to_vec(&event).expect("serialize");
        let restored: Event = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(event, restored);
    }

    #[test]
    fn event_type_uses_snake_case_wire_form() {
        let json = serde_json::to_string(&EventType::GovernanceDecision).expect("serialize");
        assert_eq!(json, "\"governance_decision\"");
    }
}
