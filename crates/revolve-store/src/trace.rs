// crates/revolve-store/src/trace.rs
// ============================================================================
// Module: Trace Store
// Description: Summaries, append-only events, blobs, and the secondary
// query index, all layered over an ArtifactStore.
// Purpose: Implement C2 (Trace Store) for the Signal Collector and other
// downstream readers.
// Dependencies: revolve-core, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! `TraceStore` is a thin, typed layer over any [`ArtifactStore`]: it does
//! not hold state of its own beyond the store handle. A missing summary is
//! `Ok(None)`; a malformed one is logged and treated the same as absent —
//! the reader never panics on a corrupt record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use revolve_core::ArtifactStore;
use revolve_core::Event;
use revolve_core::RunRecord;
use revolve_core::StoreError;
use revolve_core::Timestamp;
use revolve_core::run::FinalState;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: TraceSummary
// ============================================================================

/// A small, quickly-loadable summary of one run, kept alongside the full
/// `RunRecord` for cheap existence/outcome checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Schema version of this record.
    pub schema_version: String,
    /// The run this summary covers.
    pub run_id: String,
    /// The run's terminal state.
    pub final_state: FinalState,
    /// The policy that governed the run.
    pub policy_id: String,
    /// Total cost of the run in US dollars.
    pub cost_usd: f64,
    /// Total latency of the run in milliseconds.
    pub latency_ms: u64,
    /// When the summary was written.
    pub generated_at: Timestamp,
}

impl TraceSummary {
    /// Builds a summary from a completed run's record.
    #[must_use]
    pub fn from_run_record(record: &RunRecord) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            run_id: record.run_id.as_str().to_string(),
            final_state: record.final_state,
            policy_id: record.policy_id.as_str().to_string(),
            cost_usd: record.cost_summary.total_usd,
            latency_ms: record.latency_ms,
            generated_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// SECTION: Index entry
// ============================================================================

/// One entry in the secondary query index, appended whenever a run
/// completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Coarse time bucket the run completed in (e.g. an hour-aligned
    /// RFC3339 prefix).
    pub time_bucket: String,
    /// The run's terminal state.
    pub final_state: FinalState,
    /// The dominant tool failure type, when any tool call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    /// A coarse cost bucket (e.g. `"low"`, `"medium"`, `"high"`).
    pub cost_bucket: String,
    /// The run this entry indexes.
    pub run_id: String,
}

/// Buckets a cost value into the same small vocabulary used across the
/// index.
#[must_use]
pub fn cost_bucket(cost_usd: f64) -> &'static str {
    if cost_usd < 0.05 {
        "low"
    } else if cost_usd < 0.5 {
        "medium"
    } else {
        "high"
    }
}

// ============================================================================
// SECTION: Event offset index
// ============================================================================

/// One entry in an event log's companion offset index: the byte offset a
/// given event's line starts at in the main JSONL log, so `load_events`
/// can seek past already-read events rather than re-parsing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct EventOffset {
    /// The event this entry locates.
    event_id: u64,
    /// The byte offset its line starts at in the main event log.
    offset: u64,
}

// ============================================================================
// SECTION: TraceStore
// ============================================================================

const SUMMARIES_PREFIX: &str = "trace_store/summaries";
const EVENTS_PREFIX: &str = "trace_store/events";
const BLOBS_PREFIX: &str = "trace_store/blobs";
const INDEX_KEY: &str = "trace_store/index/tasks_index.jsonl";

/// The three read/write views C2 exposes over an [`ArtifactStore`], plus the
/// secondary query index.
pub struct TraceStore<'store> {
    store: &'store dyn ArtifactStore,
}

impl<'store> TraceStore<'store> {
    /// Wraps an [`ArtifactStore`] handle with the trace-store views.
    #[must_use]
    pub fn new(store: &'store dyn ArtifactStore) -> Self {
        Self { store }
    }

    /// Writes a run's summary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub fn put_summary(&self, summary: &TraceSummary) -> Result<(), StoreError> {
        let key = format!("{SUMMARIES_PREFIX}/{}.json", summary.run_id);
        let bytes = serde_json::to_vec(summary).map_err(|source| StoreError::Serialize { key: key.clone(), source })?;
        self.store.put(&key, &bytes)?;
        Ok(())
    }

    /// Reads a run's summary. Returns `Ok(None)` when absent or malformed;
    /// malformed records are logged rather than causing a read failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying read fails.
    pub fn get_summary(&self, run_id: &str) -> Result<Option<TraceSummary>, StoreError> {
        let key = format!("{SUMMARIES_PREFIX}/{run_id}.json");
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<TraceSummary>(&bytes) {
            Ok(summary) => Ok(Some(summary)),
            Err(error) => {
                tracing::warn!(run_id, error = %error, "skipping malformed trace summary");
                Ok(None)
            }
        }
    }

    /// Appends one event to a run's event log, and records the byte offset
    /// it was written at in a small companion offset index so later reads
    /// can skip straight to it rather than re-scanning the log from the
    /// start.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either write fails.
    pub fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let key = format!("{EVENTS_PREFIX}/{}.jsonl", event.run_id.as_str());
        let offset = self.store.len(&key)?.unwrap_or(0);

        let mut bytes = serde_json::to_vec(event).map_err(|source| StoreError::Serialize { key: key.clone(), source })?;
        bytes.push(b'\n');
        self.store.append(&key, &bytes)?;

        let offsets_key = Self::offsets_key(event.run_id.as_str());
        let entry = EventOffset { event_id: event.event_id, offset };
        let mut offset_bytes = serde_json::to_vec(&entry).map_err(|source| StoreError::Serialize { key: offsets_key.clone(), source })?;
        offset_bytes.push(b'\n');
        self.store.append(&offsets_key, &offset_bytes)
    }

    /// Loads up to `limit` events for `run_id` with `event_id` strictly
    /// greater than `cursor` (or from the start, when `cursor` is `None`).
    /// Returns the events and the cursor to pass for the next page, or
    /// `None` when there is nothing more to read.
    ///
    /// Rather than re-reading and re-parsing the whole event log on every
    /// call, a `cursor` is resolved against the offset index first, and
    /// only the unread tail of the log (from that byte offset onward) is
    /// fetched and parsed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying read fails. Individual
    /// malformed lines are logged and skipped rather than aborting the
    /// whole read.
    pub fn load_events(&self, run_id: &str, cursor: Option<u64>, limit: usize) -> Result<(Vec<Event>, Option<u64>), StoreError> {
        let key = format!("{EVENTS_PREFIX}/{run_id}.jsonl");

        let start_offset = match cursor {
            None => 0,
            Some(after) => match self.offset_after(run_id, after)? {
                Some(offset) => offset,
                None => return Ok((Vec::new(), None)),
            },
        };

        let Some(bytes) = self.store.get_from(&key, start_offset)? else {
            return Ok((Vec::new(), None));
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut events = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(error) => {
                    tracing::warn!(run_id, error = %error, "skipping malformed event line");
                }
            }
        }
        events.sort_by_key(|event| event.event_id);
        events.truncate(limit);
        let next_cursor = events.last().map(|event| event.event_id);
        Ok((events, next_cursor))
    }

    /// Builds the offset-index key for `run_id`.
    fn offsets_key(run_id: &str) -> String {
        format!("{EVENTS_PREFIX}/{run_id}.offsets.jsonl")
    }

    /// Resolves the byte offset of the first event with `event_id` strictly
    /// greater than `after`, from the offset index. Returns `Ok(None)` when
    /// the index is absent or every indexed event is at or before `after`.
    fn offset_after(&self, run_id: &str, after: u64) -> Result<Option<u64>, StoreError> {
        let offsets_key = Self::offsets_key(run_id);
        let Some(bytes) = self.store.get(&offsets_key)? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventOffset>(line) {
                Ok(entry) if entry.event_id > after => return Ok(Some(entry.offset)),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(run_id, error = %error, "skipping malformed event offset line");
                }
            }
        }
        Ok(None)
    }

    /// Writes a blob keyed by `run_id` and `blob_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub fn put_blob(&self, run_id: &str, blob_id: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let key = format!("{BLOBS_PREFIX}/{run_id}_{blob_id}.json");
        self.store.put(&key, bytes)
    }

    /// Reads a blob keyed by `run_id` and `blob_id`, or `Ok(None)` when
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying read fails.
    pub fn get_blob(&self, run_id: &str, blob_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = format!("{BLOBS_PREFIX}/{run_id}_{blob_id}.json");
        self.store.get(&key)
    }

    /// Appends one entry to the secondary query index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub fn append_index_entry(&self, entry: &IndexEntry) -> Result<(), StoreError> {
        let mut bytes = serde_json::to_vec(entry).map_err(|source| StoreError::Serialize {
            key: INDEX_KEY.to_string(),
            source,
        })?;
        bytes.push(b'\n');
        self.store.append(INDEX_KEY, &bytes)
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
    use revolve_core::EventPayload;
    use revolve_core::EventType;
    use revolve_core::RunId;

    use super::*;
    use crate::artifact::FsArtifactStore;

    #[test]
    fn summary_round_trips_and_absent_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backing = FsArtifactStore::open(dir.path()).expect("open");
        let trace = TraceStore::new(&backing);

        assert!(trace.get_summary("missing").expect("get").is_none());

        let summary = TraceSummary {
            schema_version: "1.0".to_string(),
            run_id: "run-1".to_string(),
            final_state: FinalState::Completed,
            policy_id: "policy-1".to_string(),
            cost_usd: 0.1,
            latency_ms: 500,
            generated_at: Timestamp::now(),
        };
        trace.put_summary(&summary).expect("put");
        let restored = trace.get_summary("run-1").expect("get").expect("present");
        assert_eq!(restored, summary);
    }

    #[test]
    fn load_events_paginates_by_cursor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backing = FsArtifactStore::open(dir.path()).expect("open");
        let trace = TraceStore::new(&backing);
        let run_id = RunId::new("run-1");

        for id in 0..5 {
            let event = Event::new(
                id,
                run_id.clone(),
                Timestamp::now(),
                EventType::ToolCall,
                EventPayload::Inline {
                    value: serde_json::json!({"i": id}),
                },
            );
            trace.append_event(&event).expect("append");
        }

        let (first_page, cursor) = trace.load_events("run-1", None, 2).expect("load");
        assert_eq!(first_page.len(), 2);
        assert_eq!(cursor, Some(1));

        let (second_page, cursor) = trace.load_events("run-1", cursor, 2).expect("load");
        assert_eq!(second_page.len(), 2);
        assert_eq!(second_page[0].event_id, 2);
        assert_eq!(cursor, Some(3));
    }

    #[test]
    fn cost_bucket_classifies_boundaries() {
        assert_eq!(cost_bucket(0.01), "low");
        assert_eq!(cost_bucket(0.1), "medium");
        assert_eq!(cost_bucket(1.0), "high");
    }
}
