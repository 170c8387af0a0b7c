//! Test fixtures for loader testing.
//!
//! Builders for the documents exchanged by the ETL pipeline: patients referencing
//! their practitioners and organizations by identifier, and the practitioners and
//! organizations those references point at.

use serde_json::{Value, json};

/// Identifier system used by most fixtures.
pub const SYSTEM: &str = "sys1";

/// Builds a logical reference by (value, system) identifier.
pub fn identifier_reference(target_type: &str, value: &str, system: &str) -> Value {
    json!({
        "type": target_type,
        "identifier": {"value": value, "system": system}
    })
}

/// Builds a logical reference by type-coded identifier.
pub fn type_coded_reference(target_type: &str, code: &str, system: &str) -> Value {
    json!({
        "type": target_type,
        "identifier": {"type": {"coding": [{"code": code, "system": system}]}}
    })
}

/// A patient fixture for testing.
#[derive(Debug, Clone)]
pub struct PatientFixture {
    /// Patient ID.
    pub id: String,
    /// Patient family name.
    pub family: String,
    /// General practitioner references.
    pub general_practitioners: Vec<Value>,
    /// Managing organization reference.
    pub managing_organization: Option<Value>,
}

impl PatientFixture {
    /// Creates a new patient fixture with minimal required fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: "Smith".to_string(),
            general_practitioners: vec![],
            managing_organization: None,
        }
    }

    /// Adds a general practitioner referenced by (value, system).
    pub fn with_practitioner(mut self, value: &str, system: &str) -> Self {
        self.general_practitioners
            .push(identifier_reference("Practitioner", value, system));
        self
    }

    /// Adds an arbitrary general practitioner reference value.
    pub fn with_practitioner_reference(mut self, reference: Value) -> Self {
        self.general_practitioners.push(reference);
        self
    }

    /// Sets the managing organization reference.
    pub fn with_organization(mut self, reference: Value) -> Self {
        self.managing_organization = Some(reference);
        self
    }

    /// Converts to FHIR JSON.
    pub fn to_json(&self) -> Value {
        let mut patient = json!({
            "resourceType": "Patient",
            "id": self.id,
            "name": [{"family": self.family}],
        });

        if !self.general_practitioners.is_empty() {
            patient["generalPractitioner"] = json!(self.general_practitioners);
        }

        if let Some(organization) = &self.managing_organization {
            patient["managingOrganization"] = organization.clone();
        }

        patient
    }
}

/// A practitioner fixture for testing.
#[derive(Debug, Clone)]
pub struct PractitionerFixture {
    /// Practitioner ID.
    pub id: String,
    /// Raw identifier values.
    pub identifiers: Vec<Value>,
}

impl PractitionerFixture {
    /// Creates a new practitioner fixture without identifiers.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            identifiers: vec![],
        }
    }

    /// Adds a (value, system) identifier.
    pub fn with_identifier(mut self, value: &str, system: &str) -> Self {
        self.identifiers
            .push(json!({"value": value, "system": system}));
        self
    }

    /// Adds a type-coded identifier.
    pub fn with_type_identifier(mut self, code: &str, system: &str) -> Self {
        self.identifiers
            .push(json!({"type": {"coding": [{"code": code, "system": system}]}}));
        self
    }

    /// Adds an arbitrary identifier value.
    pub fn with_raw_identifier(mut self, identifier: Value) -> Self {
        self.identifiers.push(identifier);
        self
    }

    /// Converts to FHIR JSON.
    pub fn to_json(&self) -> Value {
        let mut practitioner = json!({
            "resourceType": "Practitioner",
            "id": self.id,
        });
        if !self.identifiers.is_empty() {
            practitioner["identifier"] = json!(self.identifiers);
        }
        practitioner
    }
}

/// Builds an organization carrying one (value, system) identifier.
pub fn organization(id: &str, value: &str, system: &str) -> Value {
    json!({
        "resourceType": "Organization",
        "id": id,
        "identifier": [{"value": value, "system": system}]
    })
}
