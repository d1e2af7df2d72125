// crates/revolve-store/src/lib.rs
// ============================================================================
// Module: Revolve Store
// Description: Filesystem artifact store (C1) and trace store views (C2).
// Purpose: The only crate in this workspace that touches a filesystem path
// directly; every other crate depends on `revolve_core::ArtifactStore`.
// Dependencies: revolve-core, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! `revolve-store` provides [`FsArtifactStore`], the production
//! [`revolve_core::ArtifactStore`] implementation, and [`TraceStore`], the
//! typed summaries/events/blobs/index views C2 specifies over it.

pub mod artifact;
pub mod trace;

pub use artifact::FsArtifactStore;
pub use trace::IndexEntry;
pub use trace::TraceStore;
pub use trace::TraceSummary;
pub use trace::cost_bucket;
