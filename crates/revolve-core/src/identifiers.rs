// crates/revolve-core/src/identifiers.rs
// ============================================================================
// Module: Revolve Identifiers
// Description: Canonical opaque identifiers for runs, policies, candidates,
// and patterns.
// Purpose: Provide strongly typed, serializable identifiers with stable wire
// forms so callers cannot mix up string-keyed entities at compile time.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque UTF-8 strings on the wire. No normalization is
//! applied; callers are responsible for using a consistent convention
//! (e.g., ULIDs, UUIDs) when minting new identifiers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Macro
// ============================================================================

/// Defines an opaque, string-backed identifier newtype with the standard
/// constructor/accessor/display/from impls used throughout this crate.
macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// # Invariants
        /// - Opaque UTF-8 string; no normalization or validation is applied by
        ///   this type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new ", stringify!($name), ".")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(RunId, "Run identifier, unique per executed run.");
opaque_id!(PlanId, "Plan identifier chosen by the (external) planner.");
opaque_id!(PolicyId, "Policy identifier for a released, versioned configuration.");
opaque_id!(CandidateId, "Candidate policy identifier generated during exploration.");
opaque_id!(RetrievalPolicyId, "Retrieval policy identifier.");
opaque_id!(PromptTemplateId, "Prompt template identifier.");
opaque_id!(ToolChainId, "Tool-chain identifier (a named sequence of tools).");
opaque_id!(TaskId, "External task identifier carried in a run context.");
opaque_id!(ProjectId, "External project identifier carried in a run context.");
opaque_id!(UserId, "External user identifier carried in a run context.");

/// Identifies a class of execution behavior for cross-run learning: a hash
/// of (tool sequence, planner choice, retrieval policy id, evidence count
/// bucket, prompt template id). See [`crate::pattern::PatternSignature`] for
/// the structured form this key is derived from.
///
/// # Invariants
/// - Opaque, stable hex digest string; equal inputs always produce an equal
///   key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternKey(String);

impl PatternKey {
    /// Creates a new pattern key from a precomputed digest string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
