//! Per-document resolution outcomes.
//!
//! Recoverable failures never abort a resolution; they are recorded here instead so
//! callers and tests can inspect exactly what happened to each reference.

use std::fmt;

use crate::cache::{SourceKey, TargetKey};
use crate::error::{IdentifierError, PathError};

/// Why a reference was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The reference's identifier is not a usable lookup key.
    InvalidIdentifier(IdentifierError),
    /// The declared path does not resolve inside the document.
    PathNotFound(PathError),
    /// The value at the path is not shaped like a Reference.
    InvalidReference(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InvalidIdentifier(err) => write!(f, "{}", err),
            SkipReason::PathNotFound(err) => write!(f, "{}", err),
            SkipReason::InvalidReference(message) => write!(f, "invalid reference: {}", message),
        }
    }
}

/// What happened to one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The target already existed; `reference` holds the literal `Type/id`.
    Resolved {
        /// The literal reference written into the document.
        reference: String,
    },
    /// The target does not exist yet; the reference waits in the cache.
    Deferred {
        /// The awaited target.
        target: TargetKey,
    },
    /// The reference could not be processed and was left untouched.
    Skipped {
        /// Why it was skipped.
        reason: SkipReason,
    },
}

/// The outcome of one reference (or of a whole path that failed to resolve).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceOutcome {
    /// The reference path as declared by the caller.
    pub path: String,
    /// Position within an array of references, `None` for a single reference.
    pub index: Option<usize>,
    /// What happened.
    pub outcome: BindOutcome,
}

/// One store update issued while discharging pending references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DischargeOutcome {
    /// The target that arrived.
    pub target: TargetKey,
    /// The field pattern that was updated.
    pub source: SourceKey,
    /// The source documents that were waiting.
    pub source_ids: Vec<String>,
    /// How many documents the update matched.
    pub matched: u64,
}

/// An identifier of the arriving document that could not be canonicalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierSkip {
    /// Position within the document's `identifier` array.
    pub index: usize,
    /// Why it was skipped.
    pub error: IdentifierError,
}

/// Everything that happened while resolving one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Outcomes of the document's own outbound references.
    pub references: Vec<ReferenceOutcome>,
    /// Store updates discharging references to this document.
    pub discharges: Vec<DischargeOutcome>,
    /// Identifiers of this document that were ignored for discharge.
    pub skipped_identifiers: Vec<IdentifierSkip>,
}

impl ResolutionReport {
    /// Number of references resolved immediately.
    pub fn resolved(&self) -> usize {
        self.count(|o| matches!(o, BindOutcome::Resolved { .. }))
    }

    /// Number of references deferred to the cache.
    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, BindOutcome::Deferred { .. }))
    }

    /// Number of references (or paths) skipped.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, BindOutcome::Skipped { .. }))
    }

    /// Total number of documents matched by discharge updates.
    pub fn discharged(&self) -> u64 {
        self.discharges.iter().map(|d| d.matched).sum()
    }

    /// Returns the outcomes recorded for a declared path.
    pub fn outcomes_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a ReferenceOutcome> {
        self.references.iter().filter(move |o| o.path == path)
    }

    fn count(&self, predicate: impl Fn(&BindOutcome) -> bool) -> usize {
        self.references
            .iter()
            .filter(|o| predicate(&o.outcome))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counters() {
        let report = ResolutionReport {
            references: vec![
                ReferenceOutcome {
                    path: "subject".to_string(),
                    index: None,
                    outcome: BindOutcome::Resolved {
                        reference: "Patient/p1".to_string(),
                    },
                },
                ReferenceOutcome {
                    path: "performer".to_string(),
                    index: Some(0),
                    outcome: BindOutcome::Skipped {
                        reason: SkipReason::InvalidReference("missing type".to_string()),
                    },
                },
            ],
            ..Default::default()
        };
        assert_eq!(report.resolved(), 1);
        assert_eq!(report.deferred(), 0);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.discharged(), 0);
        assert_eq!(report.outcomes_for("performer").count(), 1);
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::InvalidReference("missing identifier".to_string());
        assert_eq!(reason.to_string(), "invalid reference: missing identifier");
    }
}
