// crates/revolve-core/src/time.rs
// ============================================================================
// Module: Revolve Time Model
// Description: Canonical UTC timestamp representation for artifacts.
// Purpose: Provide a fixed-width, lexicographically-sortable wire format.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Every persisted record stamps a [`Timestamp`] for `generated_at` or
//! equivalent fields. The wire form is RFC3339 with millisecond precision, so
//! two timestamps can be compared lexicographically without parsing, per the
//! "fixed-width to seconds or finer" convention this system commits to.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical UTC timestamp used across every artifact.
///
/// # Invariants
/// - Wire form is RFC3339 with millisecond precision (fixed width).
/// - Ordering by the wire string matches chronological ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Captures the current wall-clock time as a [`Timestamp`].
    ///
    /// Callers at record-construction boundaries use this; pure decision
    /// logic never calls it directly, preserving determinism for replay.
    #[must_use]
    pub fn now() -> Self {
        Self::from_offset(OffsetDateTime::now_utc())
    }

    /// Builds a [`Timestamp`] from an explicit [`OffsetDateTime`].
    #[must_use]
    pub fn from_offset(value: OffsetDateTime) -> Self {
        let value = value.replace_millisecond(value.millisecond()).unwrap_or(value);
        Self(value.format(&Rfc3339).unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()))
    }

    /// Returns the RFC3339 wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses an RFC3339 string into a [`Timestamp`].
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is not a valid RFC3339 timestamp.
    pub fn parse(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339)?;
        Ok(Self(value.to_string()))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
