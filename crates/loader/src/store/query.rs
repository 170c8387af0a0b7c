//! Store query language.
//!
//! The binder talks to the document store through three small value types:
//!
//! - [`Predicate`] - a conjunction of `path = "string"` clauses
//! - [`Filter`] - an `id ∈ {...}` clause plus an optional condition on one field
//! - [`Update`] - sets a single field, optionally on matched array elements only
//!
//! Backends evaluate these in Rust over decoded JSON, so every backend shares the
//! same matching semantics.
//!
//! # Array semantics
//!
//! A numeric segment indexes an array. A key segment that meets an array applies the
//! *remaining* conjunction to each element and succeeds if one element satisfies all
//! of it, so `identifier.value` and `identifier.system` must hold on the same
//! identifier rather than on two different ones.

use serde_json::Value;

use crate::path::{FieldPath, Segment};

/// One equality clause of a [`Predicate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Path relative to the value the predicate is evaluated against.
    pub path: FieldPath,
    /// The expected string value.
    pub expected: String,
}

/// A conjunction of string equality clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Creates an empty predicate, which matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clause.
    pub fn push(&mut self, path: FieldPath, expected: impl Into<String>) {
        self.clauses.push(Clause {
            path,
            expected: expected.into(),
        });
    }

    /// Adds a clause, builder style.
    pub fn with(mut self, path: FieldPath, expected: impl Into<String>) -> Self {
        self.push(path, expected);
        self
    }

    /// Returns the clauses of this predicate.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Returns true if the predicate has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluates the predicate against a value.
    pub fn matches(&self, value: &Value) -> bool {
        let clauses: Vec<PendingClause<'_>> = self
            .clauses
            .iter()
            .map(|c| (c.path.segments(), c.expected.as_str()))
            .collect();
        matches_clauses(value, &clauses)
    }
}

type PendingClause<'a> = (&'a [Segment], &'a str);

fn matches_clauses(value: &Value, clauses: &[PendingClause<'_>]) -> bool {
    let mut nested: Vec<PendingClause<'_>> = Vec::new();
    for &(path, expected) in clauses {
        if path.is_empty() {
            if !leaf_matches(value, expected) {
                return false;
            }
        } else {
            nested.push((path, expected));
        }
    }
    if nested.is_empty() {
        return true;
    }

    match value {
        Value::Object(map) => group_by_head(&nested).into_iter().all(|(head, rest)| {
            match head {
                Segment::Key(key) => map
                    .get(key)
                    .is_some_and(|child| matches_clauses(child, &rest)),
                Segment::Index(_) => false,
            }
        }),
        Value::Array(items) => {
            let (indexed, keyed): (Vec<_>, Vec<_>) = nested
                .into_iter()
                .partition(|(path, _)| matches!(path[0], Segment::Index(_)));

            let indexed_ok = group_by_head(&indexed)
                .into_iter()
                .all(|(head, rest)| match head {
                    Segment::Index(index) => items
                        .get(*index)
                        .is_some_and(|item| matches_clauses(item, &rest)),
                    Segment::Key(_) => false,
                });

            indexed_ok
                && (keyed.is_empty() || items.iter().any(|item| matches_clauses(item, &keyed)))
        }
        _ => false,
    }
}

fn leaf_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Array(items) => items.iter().any(|item| item.as_str() == Some(expected)),
        _ => false,
    }
}

/// Groups clauses by their first segment, stripping it, in first-seen order.
fn group_by_head<'a>(
    clauses: &[PendingClause<'a>],
) -> Vec<(&'a Segment, Vec<PendingClause<'a>>)> {
    let mut groups: Vec<(&'a Segment, Vec<PendingClause<'a>>)> = Vec::new();
    for &(path, expected) in clauses {
        let (head, rest) = (&path[0], &path[1..]);
        match groups.iter_mut().find(|(h, _)| *h == head) {
            Some((_, group)) => group.push((rest, expected)),
            None => groups.push((head, vec![(rest, expected)])),
        }
    }
    groups
}

/// A condition on one field of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldCondition {
    /// The value at `path` satisfies the predicate.
    Matches {
        /// Field the predicate is evaluated against.
        path: FieldPath,
        /// Predicate relative to the field.
        predicate: Predicate,
    },
    /// The value at `path` is an array with at least one element satisfying the predicate.
    ElemMatch {
        /// Array field.
        path: FieldPath,
        /// Predicate relative to each element.
        predicate: Predicate,
    },
}

impl FieldCondition {
    /// Evaluates the condition against a document.
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            FieldCondition::Matches { path, predicate } => path
                .get(document)
                .is_ok_and(|value| predicate.matches(value)),
            FieldCondition::ElemMatch { path, predicate } => match path.get(document) {
                Ok(Value::Array(items)) => items.iter().any(|item| predicate.matches(item)),
                _ => false,
            },
        }
    }
}

/// Selects the documents an [`Update`] applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    ids: Option<Vec<String>>,
    condition: Option<FieldCondition>,
}

impl Filter {
    /// Creates a filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to documents whose `id` is in `ids`.
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a field condition.
    pub fn with_condition(mut self, condition: FieldCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Returns the id restriction, if any.
    pub fn ids(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    /// Returns the field condition, if any.
    pub fn condition(&self) -> Option<&FieldCondition> {
        self.condition.as_ref()
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, document: &Value) -> bool {
        if let Some(ids) = &self.ids {
            let id = document.get("id").and_then(Value::as_str);
            if !id.is_some_and(|id| ids.iter().any(|candidate| candidate == id)) {
                return false;
            }
        }
        self.condition
            .as_ref()
            .is_none_or(|condition| condition.matches(document))
    }
}

/// Sets one field on the documents selected by a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    field: FieldPath,
    value: Value,
}

impl Update {
    /// Creates an update setting `field` to `value`.
    ///
    /// `field` is relative to the filter's condition path: the field itself for
    /// [`FieldCondition::Matches`], each matched element for
    /// [`FieldCondition::ElemMatch`], the document root otherwise.
    pub fn set(field: FieldPath, value: Value) -> Self {
        Self { field, value }
    }

    /// Returns the field being set.
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    /// Returns the value being written.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Applies the update to a document already selected by `filter`.
    ///
    /// With an `ElemMatch` condition only the array elements satisfying the
    /// predicate are modified. Returns true if anything was written.
    pub fn apply(&self, document: &mut Value, filter: &Filter) -> bool {
        match filter.condition() {
            None => self.field.set(document, self.value.clone()).is_ok(),
            Some(FieldCondition::Matches { path, .. }) => path
                .join(&self.field)
                .set(document, self.value.clone())
                .is_ok(),
            Some(FieldCondition::ElemMatch { path, predicate }) => {
                let Ok(Value::Array(items)) = path.get_mut(document) else {
                    return false;
                };
                let mut written = false;
                for item in items.iter_mut().filter(|item| predicate.matches(item)) {
                    written |= self.field.set(item, self.value.clone()).is_ok();
                }
                written
            }
        }
    }
}

/// Restricts a document to the requested top-level fields.
///
/// An empty projection returns the whole document.
pub fn project(document: &Value, fields: &[&str]) -> Value {
    if fields.is_empty() {
        return document.clone();
    }
    let mut projected = serde_json::Map::new();
    if let Value::Object(map) = document {
        for field in fields {
            if let Some(value) = map.get(*field) {
                projected.insert((*field).to_string(), value.clone());
            }
        }
    }
    Value::Object(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> FieldPath {
        FieldPath::parse(p).unwrap()
    }

    fn identifier_predicate(value: &str, system: &str) -> Predicate {
        Predicate::new()
            .with(path("identifier.value"), value)
            .with(path("identifier.system"), system)
    }

    #[test]
    fn test_predicate_matches_identifier_array() {
        let practitioner = json!({
            "resourceType": "Practitioner",
            "id": "q1",
            "identifier": [
                {"value": "999", "system": "other"},
                {"value": "123", "system": "sys1"}
            ]
        });
        assert!(identifier_predicate("123", "sys1").matches(&practitioner));
        assert!(!identifier_predicate("123", "other").matches(&practitioner));
    }

    #[test]
    fn test_predicate_clauses_hold_on_same_element() {
        let doc = json!({
            "identifier": [
                {"value": "123", "system": "a"},
                {"value": "999", "system": "sys1"}
            ]
        });
        assert!(!identifier_predicate("123", "sys1").matches(&doc));
    }

    #[test]
    fn test_predicate_on_single_object() {
        let reference = json!({"type": "Practitioner", "identifier": {"value": "123", "system": "sys1"}});
        assert!(identifier_predicate("123", "sys1").matches(&reference));
    }

    #[test]
    fn test_predicate_numeric_index() {
        let doc = json!({
            "identifier": [{"type": {"coding": [{"code": "MR", "system": "v2"}]}}]
        });
        let predicate = Predicate::new()
            .with(path("identifier.type.coding.0.code"), "MR")
            .with(path("identifier.type.coding.0.system"), "v2");
        assert!(predicate.matches(&doc));

        let wrong = Predicate::new().with(path("identifier.type.coding.1.code"), "MR");
        assert!(!wrong.matches(&doc));
    }

    #[test]
    fn test_empty_predicate_matches_everything() {
        assert!(Predicate::new().matches(&json!({})));
    }

    #[test]
    fn test_filter_ids_and_elem_match() {
        let doc = json!({
            "id": "p1",
            "generalPractitioner": [
                {"identifier": {"value": "123", "system": "sys1"}}
            ]
        });
        let condition = FieldCondition::ElemMatch {
            path: path("generalPractitioner"),
            predicate: identifier_predicate("123", "sys1"),
        };
        let filter = Filter::new()
            .with_ids(["p1", "p2"])
            .with_condition(condition.clone());
        assert!(filter.matches(&doc));

        let other_ids = Filter::new().with_ids(["p3"]).with_condition(condition);
        assert!(!other_ids.matches(&doc));
    }

    #[test]
    fn test_elem_match_requires_array() {
        let doc = json!({"id": "p1", "managingOrganization": {"identifier": {"value": "1", "system": "s"}}});
        let condition = FieldCondition::ElemMatch {
            path: path("managingOrganization"),
            predicate: identifier_predicate("1", "s"),
        };
        assert!(!condition.matches(&doc));
    }

    #[test]
    fn test_update_elem_match_touches_matching_elements_only() {
        let mut doc = json!({
            "id": "p1",
            "generalPractitioner": [
                {"identifier": {"value": "123", "system": "sys1"}},
                {"identifier": {"value": "456", "system": "sys1"}}
            ]
        });
        let filter = Filter::new().with_condition(FieldCondition::ElemMatch {
            path: path("generalPractitioner"),
            predicate: identifier_predicate("123", "sys1"),
        });
        let update = Update::set(path("reference"), json!("Practitioner/q1"));

        assert!(update.apply(&mut doc, &filter));
        assert_eq!(doc["generalPractitioner"][0]["reference"], "Practitioner/q1");
        assert!(doc["generalPractitioner"][1].get("reference").is_none());
    }

    #[test]
    fn test_update_matches_sets_nested_field() {
        let mut doc = json!({
            "id": "o1",
            "subject": {"identifier": {"value": "p", "system": "s"}}
        });
        let filter = Filter::new().with_condition(FieldCondition::Matches {
            path: path("subject"),
            predicate: identifier_predicate("p", "s"),
        });
        assert!(Update::set(path("reference"), json!("Patient/p1")).apply(&mut doc, &filter));
        assert_eq!(doc["subject"]["reference"], "Patient/p1");
    }

    #[test]
    fn test_project() {
        let doc = json!({"id": "q1", "resourceType": "Practitioner", "name": []});
        assert_eq!(project(&doc, &["id"]), json!({"id": "q1"}));
        assert_eq!(project(&doc, &[]), doc);
    }
}
