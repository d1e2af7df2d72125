// crates/revolve-core/src/error.rs
// ============================================================================
// Module: Revolve Core Errors
// Description: Shared error type for data-model construction and validation
// failures.
// Purpose: Give every crate downstream of revolve-core a single error type to
// convert into when a core invariant is violated.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`CoreError`] covers failures that can occur while constructing or
//! validating a core record: a malformed identifier, a weight vector that
//! does not sum to one, or a hashing failure. It is deliberately narrow;
//! storage and network failures belong to the crates that own those
//! concerns (see `revolve-store::StoreError`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::hashing::HashingError;

// ============================================================================
// SECTION: Error
// ============================================================================

/// Errors raised while constructing or validating a core record.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A weight vector that is required to sum to 1 (within tolerance) did
    /// not.
    #[error("weights must sum to 1 +/- {tolerance}, got {actual}")]
    WeightsNotNormalized {
        /// The observed sum.
        actual: f64,
        /// The tolerance that was allowed.
        tolerance: f64,
    },

    /// A value that is required to lie within `[lo, hi]` did not.
    #[error("field '{field}' out of range [{lo}, {hi}]: {actual}")]
    OutOfRange {
        /// The field name, for diagnostics.
        field: &'static str,
        /// The lower bound, inclusive.
        lo: f64,
        /// The upper bound, inclusive.
        hi: f64,
        /// The observed value.
        actual: f64,
    },

    /// A traffic split did not sum to 1 within tolerance.
    #[error("traffic split must sum to 1 +/- {tolerance}, got {actual}")]
    TrafficSplitNotNormalized {
        /// The observed sum.
        actual: f64,
        /// The tolerance that was allowed.
        tolerance: f64,
    },

    /// A record could not be canonicalized or hashed.
    #[error("hashing failure: {0}")]
    Hashing(#[from] HashingError),

    /// A timestamp string failed to parse as RFC3339.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] time::error::Parse),
}
