//! Business identifier canonicalization.
//!
//! A reference names its target by business identifier rather than by storage id.
//! An identifier is usable as a lookup key only when exactly one of the
//! (`value`, `system`) and (`type.coding[0].code`, `type.coding[0].system`) pairs
//! is present. Presence is explicit: an empty string is present, `null` or a missing
//! key is not.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IdentifierError;
use crate::path::{FieldPath, Segment};
use crate::store::Predicate;

/// A typed view over the parts of a FHIR Identifier used for reference lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identifier {
    /// `Identifier.value`
    pub value: Option<String>,
    /// `Identifier.system`
    pub system: Option<String>,
    /// `Identifier.type.coding[0].code`
    pub type_code: Option<String>,
    /// `Identifier.type.coding[0].system`
    pub type_system: Option<String>,
}

/// The canonical tuple of an identifier, used as a cache key.
///
/// Exactly one of the two pairs is populated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentifierKey {
    /// Identifier value, in the value/system form.
    pub value: Option<String>,
    /// Identifier system, in the value/system form.
    pub system: Option<String>,
    /// Type code, in the type-coded form.
    pub type_code: Option<String>,
    /// Type code system, in the type-coded form.
    pub type_system: Option<String>,
}

impl Identifier {
    /// Creates a value/system identifier.
    pub fn with_value(value: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            system: Some(system.into()),
            ..Default::default()
        }
    }

    /// Creates a type-coded identifier.
    pub fn with_type(code: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            type_code: Some(code.into()),
            type_system: Some(system.into()),
            ..Default::default()
        }
    }

    /// Reads an identifier out of its JSON representation.
    pub fn from_json(identifier: &Value) -> Result<Self, IdentifierError> {
        let Value::Object(map) = identifier else {
            return Err(IdentifierError::Malformed {
                field: "identifier".to_string(),
                message: "expected an object".to_string(),
            });
        };

        let coding = map
            .get("type")
            .and_then(|t| t.get("coding"))
            .and_then(|c| c.get(0))
            .and_then(Value::as_object);

        Ok(Self {
            value: optional_string(map, "value", "identifier.value")?,
            system: optional_string(map, "system", "identifier.system")?,
            type_code: match coding {
                Some(coding) => {
                    optional_string(coding, "code", "identifier.type.coding.0.code")?
                }
                None => None,
            },
            type_system: match coding {
                Some(coding) => {
                    optional_string(coding, "system", "identifier.type.coding.0.system")?
                }
                None => None,
            },
        })
    }

    /// Validates the exactly-one-of invariant and returns the canonical key.
    pub fn canonicalize(&self) -> Result<IdentifierKey, IdentifierError> {
        let has_value = self.value.is_some() && self.system.is_some();
        let has_type = self.type_code.is_some() && self.type_system.is_some();

        if has_value == has_type {
            return Err(IdentifierError::NotExactlyOne {
                identifier: self.to_string(),
            });
        }

        Ok(IdentifierKey {
            value: self.value.clone(),
            system: self.system.clone(),
            type_code: self.type_code.clone(),
            type_system: self.type_system.clone(),
        })
    }

    /// Returns the store predicate locating a resource carrying this identifier.
    pub fn lookup_predicate(&self) -> Result<Predicate, IdentifierError> {
        Ok(self.canonicalize()?.lookup_predicate())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: &Option<String>| p.as_deref().unwrap_or("-").to_string();
        write!(
            f,
            "{{value: {}, system: {}, type.code: {}, type.system: {}}}",
            part(&self.value),
            part(&self.system),
            part(&self.type_code),
            part(&self.type_system)
        )
    }
}

impl IdentifierKey {
    /// Returns true for the value/system form.
    pub fn is_value_form(&self) -> bool {
        self.value.is_some() && self.system.is_some()
    }

    /// Builds the store predicate for this key.
    ///
    /// Paths are rooted at `identifier`, so the same predicate applies to a target
    /// resource (whose `identifier` is an array) and to a Reference (whose
    /// `identifier` is a single object).
    pub fn lookup_predicate(&self) -> Predicate {
        let root = FieldPath::from_segments(vec![Segment::Key("identifier".to_string())]);
        let mut predicate = Predicate::new();
        if let (Some(value), Some(system)) = (&self.value, &self.system) {
            predicate.push(root.child("value"), value.clone());
            predicate.push(root.child("system"), system.clone());
        } else if let (Some(code), Some(system)) = (&self.type_code, &self.type_system) {
            let coding = root.join(&FieldPath::from_segments(vec![
                Segment::Key("type".to_string()),
                Segment::Key("coding".to_string()),
                Segment::Index(0),
            ]));
            predicate.push(coding.child("code"), code.clone());
            predicate.push(coding.child("system"), system.clone());
        }
        predicate
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: &Option<String>| p.clone().unwrap_or_default();
        write!(
            f,
            "{}|{}|{}|{}",
            part(&self.value),
            part(&self.system),
            part(&self.type_code),
            part(&self.type_system)
        )
    }
}

/// Canonicalizes a JSON identifier into its cache key.
pub fn canonicalize(identifier: &Value) -> Result<IdentifierKey, IdentifierError> {
    Identifier::from_json(identifier)?.canonicalize()
}

/// Builds the store predicate for a JSON identifier.
pub fn lookup_predicate(identifier: &Value) -> Result<Predicate, IdentifierError> {
    Identifier::from_json(identifier)?.lookup_predicate()
}

fn optional_string(
    map: &Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<Option<String>, IdentifierError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(IdentifierError::Malformed {
            field: field.to_string(),
            message: format!("expected a string, found {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonicalize_value_form() {
        let key = canonicalize(&json!({"value": "123", "system": "sys1"})).unwrap();
        assert_eq!(key.value.as_deref(), Some("123"));
        assert_eq!(key.system.as_deref(), Some("sys1"));
        assert_eq!(key.type_code, None);
        assert_eq!(key.type_system, None);
        assert!(key.is_value_form());
    }

    #[test]
    fn test_canonicalize_type_form() {
        let key = canonicalize(&json!({
            "type": {"coding": [{"code": "MR", "system": "http://terminology.hl7.org/CodeSystem/v2-0203"}]}
        }))
        .unwrap();
        assert_eq!(key.type_code.as_deref(), Some("MR"));
        assert!(!key.is_value_form());
    }

    #[test]
    fn test_canonicalize_rejects_neither_pair() {
        let err = canonicalize(&json!({"value": "123"})).unwrap_err();
        assert!(matches!(err, IdentifierError::NotExactlyOne { .. }));

        assert!(canonicalize(&json!({})).is_err());
    }

    #[test]
    fn test_canonicalize_rejects_both_pairs() {
        let err = canonicalize(&json!({
            "value": "123",
            "system": "sys1",
            "type": {"coding": [{"code": "MR", "system": "v2-0203"}]}
        }))
        .unwrap_err();
        assert!(matches!(err, IdentifierError::NotExactlyOne { .. }));
    }

    #[test]
    fn test_empty_string_is_present() {
        let key = canonicalize(&json!({"value": "", "system": "sys1"})).unwrap();
        assert_eq!(key.value.as_deref(), Some(""));
    }

    #[test]
    fn test_null_is_absent() {
        assert!(canonicalize(&json!({"value": null, "system": "sys1"})).is_err());
    }

    #[test]
    fn test_malformed_identifier() {
        assert!(matches!(
            canonicalize(&json!("123")),
            Err(IdentifierError::Malformed { .. })
        ));
        assert!(matches!(
            canonicalize(&json!({"value": 123, "system": "sys1"})),
            Err(IdentifierError::Malformed { .. })
        ));
    }

    #[test]
    fn test_type_without_coding_counts_as_absent() {
        let key = canonicalize(&json!({
            "value": "123",
            "system": "sys1",
            "type": {"text": "medical record"}
        }))
        .unwrap();
        assert!(key.is_value_form());
    }

    #[test]
    fn test_lookup_predicate_value_form() {
        let predicate = lookup_predicate(&json!({"value": "123", "system": "sys1"})).unwrap();
        let clauses: Vec<_> = predicate
            .clauses()
            .iter()
            .map(|c| (c.path.to_string(), c.expected.clone()))
            .collect();
        assert_eq!(
            clauses,
            vec![
                ("identifier.value".to_string(), "123".to_string()),
                ("identifier.system".to_string(), "sys1".to_string()),
            ]
        );
    }

    #[test]
    fn test_lookup_predicate_type_form() {
        let predicate = Identifier::with_type("MR", "v2-0203")
            .lookup_predicate()
            .unwrap();
        let paths: Vec<_> = predicate
            .clauses()
            .iter()
            .map(|c| c.path.to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "identifier.type.coding.0.code".to_string(),
                "identifier.type.coding.0.system".to_string(),
            ]
        );
    }

    #[test]
    fn test_key_display() {
        let key = Identifier::with_value("123", "sys1").canonicalize().unwrap();
        assert_eq!(key.to_string(), "123|sys1||");
    }
}
