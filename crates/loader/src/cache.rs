//! Pending reference cache.
//!
//! When a reference cannot be resolved at bind time, the binder records where it
//! lives so that the target's eventual arrival can discharge it. The cache maps a
//! [`TargetKey`] (the awaited resource) to the [`SourceKey`]s (field patterns) and
//! source document ids waiting on it:
//!
//! ```text
//! (Practitioner, 123|sys1||) -> { (Patient, generalPractitioner, array) -> [p1, p7] }
//! ```
//!
//! The cache is not synchronized. It is owned by a single binder, and all access goes
//! through `&mut self`, so every operation on a given target key is serialized.
//! Nothing is persisted: entries still pending at shutdown are lost.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::identifier::IdentifierKey;
use crate::path::FieldPath;

/// Identifies the resource of a given type carrying a given identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetKey {
    /// Target resource type.
    pub resource_type: String,
    /// Canonical identifier of the target.
    pub identifier: IdentifierKey,
}

impl TargetKey {
    /// Creates a target key.
    pub fn new(resource_type: impl Into<String>, identifier: IdentifierKey) -> Self {
        Self {
            resource_type: resource_type.into(),
            identifier,
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?identifier={}", self.resource_type, self.identifier)
    }
}

/// Identifies a field location pattern referencing a [`TargetKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    /// Resource type of the referencing documents.
    pub resource_type: String,
    /// Normalized reference path.
    pub path: FieldPath,
    /// Whether the path holds an array of references.
    pub is_array: bool,
}

impl SourceKey {
    /// Creates a source key.
    pub fn new(resource_type: impl Into<String>, path: FieldPath, is_array: bool) -> Self {
        Self {
            resource_type: resource_type.into(),
            path,
            is_array,
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.path)?;
        if self.is_array {
            f.write_str("[*]")?;
        }
        Ok(())
    }
}

/// The source documents awaiting one target, grouped by source key.
pub type PendingSources = BTreeMap<SourceKey, Vec<String>>;

/// Waiting source ids in arrival order, with a set for redelivery checks.
#[derive(Debug, Default)]
struct SourceIds {
    ids: Vec<String>,
    seen: HashSet<String>,
}

/// In-memory index from awaited targets to the references waiting on them.
#[derive(Debug, Default)]
pub struct PendingCache {
    entries: HashMap<TargetKey, BTreeMap<SourceKey, SourceIds>>,
}

impl PendingCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `source_id` has an unresolved reference to `target` at `source`.
    ///
    /// Redelivery of the same source document does not add a second entry.
    pub fn add_pending(
        &mut self,
        target: TargetKey,
        source: SourceKey,
        source_id: impl Into<String>,
    ) {
        let source_id = source_id.into();
        let waiting = self
            .entries
            .entry(target)
            .or_default()
            .entry(source)
            .or_default();
        if waiting.seen.insert(source_id.clone()) {
            waiting.ids.push(source_id);
        }
    }

    /// Removes and returns everything pending on `target`.
    ///
    /// Returns an empty mapping if nothing was pending. Exactly one caller ever
    /// observes a given pending set.
    pub fn take_and_clear(&mut self, target: &TargetKey) -> PendingSources {
        self.entries
            .remove(target)
            .map(|sources| {
                sources
                    .into_iter()
                    .map(|(source, waiting)| (source, waiting.ids))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Puts back sources taken by [`take_and_clear`](Self::take_and_clear) that could
    /// not be discharged, merging with anything added since.
    pub fn restore(&mut self, target: TargetKey, sources: PendingSources) {
        for (source, ids) in sources {
            for id in ids {
                self.add_pending(target.clone(), source.clone(), id);
            }
        }
    }

    /// Returns a copy of what is pending on `target` without removing it.
    pub fn get(&self, target: &TargetKey) -> Option<PendingSources> {
        self.entries.get(target).map(|sources| {
            sources
                .iter()
                .map(|(source, waiting)| (source.clone(), waiting.ids.clone()))
                .collect()
        })
    }

    /// Returns the number of target keys with pending references.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total number of waiting source document ids.
    pub fn pending_references(&self) -> usize {
        self.entries
            .values()
            .flat_map(|sources| sources.values().map(|waiting| waiting.ids.len()))
            .sum()
    }

    /// Iterates over every (target, source, waiting ids) triple.
    pub fn iter(&self) -> impl Iterator<Item = (&TargetKey, &SourceKey, &[String])> {
        self.entries.iter().flat_map(|(target, sources)| {
            sources
                .iter()
                .map(move |(source, waiting)| (target, source, waiting.ids.as_slice()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    fn practitioner_key(value: &str) -> TargetKey {
        TargetKey::new(
            "Practitioner",
            Identifier::with_value(value, "sys1").canonicalize().unwrap(),
        )
    }

    fn gp_source() -> SourceKey {
        SourceKey::new(
            "Patient",
            FieldPath::parse("generalPractitioner").unwrap(),
            true,
        )
    }

    #[test]
    fn test_add_pending_accumulates_in_arrival_order() {
        let mut cache = PendingCache::new();
        cache.add_pending(practitioner_key("123"), gp_source(), "p1");
        cache.add_pending(practitioner_key("123"), gp_source(), "p2");

        let pending = cache.get(&practitioner_key("123")).unwrap();
        assert_eq!(pending[&gp_source()], vec!["p1", "p2"]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending_references(), 2);
    }

    #[test]
    fn test_add_pending_ignores_redelivery() {
        let mut cache = PendingCache::new();
        cache.add_pending(practitioner_key("123"), gp_source(), "p1");
        cache.add_pending(practitioner_key("123"), gp_source(), "p1");
        assert_eq!(cache.pending_references(), 1);
    }

    #[test]
    fn test_take_and_clear_removes_entry() {
        let mut cache = PendingCache::new();
        cache.add_pending(practitioner_key("123"), gp_source(), "p1");
        cache.add_pending(practitioner_key("456"), gp_source(), "p2");

        let taken = cache.take_and_clear(&practitioner_key("123"));
        assert_eq!(taken.len(), 1);
        assert!(cache.get(&practitioner_key("123")).is_none());
        assert_eq!(cache.len(), 1);

        let again = cache.take_and_clear(&practitioner_key("123"));
        assert!(again.is_empty());
    }

    #[test]
    fn test_restore_merges_entries() {
        let mut cache = PendingCache::new();
        cache.add_pending(practitioner_key("123"), gp_source(), "p1");
        let taken = cache.take_and_clear(&practitioner_key("123"));
        cache.add_pending(practitioner_key("123"), gp_source(), "p2");

        cache.restore(practitioner_key("123"), taken);
        let pending = cache.get(&practitioner_key("123")).unwrap();
        assert_eq!(pending[&gp_source()], vec!["p2", "p1"]);
    }

    #[test]
    fn test_distinct_source_keys() {
        let mut cache = PendingCache::new();
        let single = SourceKey::new(
            "Patient",
            FieldPath::parse("generalPractitioner[0]").unwrap(),
            false,
        );
        cache.add_pending(practitioner_key("123"), gp_source(), "p1");
        cache.add_pending(practitioner_key("123"), single.clone(), "p2");

        let taken = cache.take_and_clear(&practitioner_key("123"));
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[&single], vec!["p2"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_iter_flattens_entries() {
        let mut cache = PendingCache::new();
        cache.add_pending(practitioner_key("123"), gp_source(), "p1");
        cache.add_pending(practitioner_key("123"), gp_source(), "p2");
        cache.add_pending(practitioner_key("456"), gp_source(), "p3");

        let mut triples: Vec<_> = cache
            .iter()
            .map(|(target, _, ids)| (target.identifier.value.clone(), ids.len()))
            .collect();
        triples.sort();
        assert_eq!(
            triples,
            vec![(Some("123".to_string()), 2), (Some("456".to_string()), 1)]
        );
    }

    #[test]
    fn test_key_display() {
        assert_eq!(
            practitioner_key("123").to_string(),
            "Practitioner?identifier=123|sys1||"
        );
        assert_eq!(gp_source().to_string(), "Patient.generalPractitioner[*]");
    }
}
