// crates/revolve-runtime/src/lib.rs
// ============================================================================
// Module: Revolve Runtime
// Description: The per-run learning hooks invoked off the hot path: signal
// collection, working memory, decision attribution, and KPI aggregation.
// Purpose: Implement C3, C4, C5, and C6. These are the only components the
// run path's completion handler touches before handing off to the
// Exploration Engine and Learning Controller.
// Dependencies: revolve-core, revolve-store
// ============================================================================

//! ## Overview
//! Every public function here can fail, and every failure is a
//! [`error::RuntimeError`] the hot path is expected to log and discard —
//! see the concurrency notes in `revolve_core` and the propagation policy
//! this workspace follows throughout.

pub mod attributor;
pub mod error;
pub mod kpi;
pub mod signal_collector;
pub mod working_memory;

pub use attributor::attribute;
pub use error::RuntimeError;
pub use kpi::KpiAggregator;
pub use kpi::KpiEntry;
pub use signal_collector::HistoricalContext;
pub use signal_collector::SignalCollector;
pub use working_memory::WorkingMemory;
