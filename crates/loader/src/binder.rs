//! Reference binding.
//!
//! Documents coming out of the ETL pipeline reference other resources by business
//! identifier, because the target may not have been loaded yet. For every ingested
//! document the [`ReferenceBinder`] does two things:
//!
//! 1. **Bind** the document's own references: look the target up in the store and
//!    write a literal `Type/id` reference if it exists, otherwise remember the
//!    reference in the [`PendingCache`].
//! 2. **Discharge** references waiting on this document: for each of its
//!    identifiers, take the pending entry out of the cache and update the waiting
//!    documents in the store.
//!
//! Resolution progress is driven entirely by document arrival, so no background
//! sweep is needed.
//!
//! ```text
//!                   found                 (terminal)
//! UNRESOLVED ───────────────▶ RESOLVED_IMMEDIATE
//!     │
//!     │ not found             target arrives
//!     └──────────▶ DEFERRED ─────────────────▶ RESOLVED_LATER
//! ```
//!
//! # Example
//!
//! ```
//! use helios_loader::binder::ReferenceBinder;
//! use helios_loader::store::{DocumentStore, InMemoryStore};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut binder = ReferenceBinder::new(InMemoryStore::new());
//!
//! let mut patient = json!({
//!     "resourceType": "Patient",
//!     "id": "p1",
//!     "generalPractitioner": [
//!         {"type": "Practitioner", "identifier": {"value": "123", "system": "sys1"}}
//!     ]
//! });
//! let report = binder
//!     .resolve_references(&mut patient, &["generalPractitioner"])
//!     .await?;
//! assert_eq!(report.deferred(), 1);
//! binder.store().save(patient).await?;
//!
//! let mut practitioner = json!({
//!     "resourceType": "Practitioner",
//!     "id": "q1",
//!     "identifier": [{"value": "123", "system": "sys1"}]
//! });
//! let report = binder.resolve_references(&mut practitioner, &[] as &[&str]).await?;
//! assert_eq!(report.discharged(), 1);
//! assert!(binder.cache().is_empty());
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::{PendingCache, PendingSources, SourceKey, TargetKey};
use crate::error::{IdentifierError, LoaderError, LoaderResult};
use crate::identifier::{Identifier, IdentifierKey};
use crate::path::FieldPath;
use crate::report::{
    BindOutcome, DischargeOutcome, IdentifierSkip, ReferenceOutcome, ResolutionReport, SkipReason,
};
use crate::store::{DocumentStore, FieldCondition, Filter, Update};

/// Resolves references between ingested documents.
///
/// The binder owns the pending cache for its whole lifetime. Every operation takes
/// `&mut self`, so documents are processed one at a time and cache operations on a
/// target key can never interleave.
#[derive(Debug)]
pub struct ReferenceBinder<S> {
    store: S,
    cache: PendingCache,
}

impl<S: DocumentStore> ReferenceBinder<S> {
    /// Creates a binder with an empty cache.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: PendingCache::new(),
        }
    }

    /// Returns the document store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the pending reference cache.
    pub fn cache(&self) -> &PendingCache {
        &self.cache
    }

    /// Tears the binder down, returning the references that were never discharged.
    pub fn finish(self) -> PendingCache {
        if !self.cache.is_empty() {
            warn!(
                targets = self.cache.len(),
                references = self.cache.pending_references(),
                "Binder finished with unresolved references"
            );
        }
        self.cache
    }

    /// Binds the document's references and discharges references waiting on it.
    ///
    /// The document is edited in place. Invalid identifiers and unresolvable paths
    /// are skipped and reported; only store failures abort the call.
    pub async fn resolve_references<P: AsRef<str>>(
        &mut self,
        document: &mut Value,
        reference_paths: &[P],
    ) -> LoaderResult<ResolutionReport> {
        let (resource_type, id) = document_identity(document)?;
        let mut report = ResolutionReport::default();

        for reference_path in reference_paths {
            let outcomes = self
                .bind_reference(document, reference_path.as_ref())
                .await?;
            report.references.extend(outcomes);
        }

        match document.get("identifier").cloned() {
            Some(Value::Array(identifiers)) => {
                self.discharge_pending(document, &resource_type, &id, &identifiers, &mut report)
                    .await?;
            }
            None | Some(Value::Null) => {}
            Some(_) => {
                let err = IdentifierError::Malformed {
                    field: "identifier".to_string(),
                    message: "expected an array of identifiers".to_string(),
                };
                warn!(resource_type = %resource_type, resource_id = %id, %err, "Not discharging");
                report
                    .skipped_identifiers
                    .push(IdentifierSkip { index: 0, error: err });
            }
        }

        Ok(report)
    }

    /// Binds every reference found at `reference_path`.
    ///
    /// An array of references is bound element by element; a single reference yields
    /// one outcome with no index.
    pub async fn bind_reference(
        &mut self,
        document: &mut Value,
        reference_path: &str,
    ) -> LoaderResult<Vec<ReferenceOutcome>> {
        let (resource_type, id) = document_identity(document)?;
        debug!(
            resource_type = %resource_type,
            resource_id = %id,
            path = reference_path,
            "Resolving reference"
        );

        let skipped = |reason: SkipReason| {
            warn!(
                resource_type = %resource_type,
                resource_id = %id,
                path = reference_path,
                %reason,
                "Skipping reference"
            );
            vec![ReferenceOutcome {
                path: reference_path.to_string(),
                index: None,
                outcome: BindOutcome::Skipped { reason },
            }]
        };

        let path = match FieldPath::parse(reference_path) {
            Ok(path) => path,
            Err(err) => return Ok(skipped(SkipReason::PathNotFound(err))),
        };
        let field = match path.get_mut(document) {
            Ok(field) => field,
            Err(err) => return Ok(skipped(SkipReason::PathNotFound(err))),
        };

        let mut outcomes = Vec::new();
        match field {
            Value::Array(references) => {
                let source = SourceKey::new(resource_type.as_str(), path, true);
                for (index, reference) in references.iter_mut().enumerate() {
                    let outcome = self.bind_one(reference, &source, &id).await?;
                    outcomes.push(ReferenceOutcome {
                        path: reference_path.to_string(),
                        index: Some(index),
                        outcome,
                    });
                }
            }
            reference => {
                let source = SourceKey::new(resource_type.as_str(), path, false);
                let outcome = self.bind_one(reference, &source, &id).await?;
                outcomes.push(ReferenceOutcome {
                    path: reference_path.to_string(),
                    index: None,
                    outcome,
                });
            }
        }

        Ok(outcomes)
    }

    async fn bind_one(
        &mut self,
        reference: &mut Value,
        source: &SourceKey,
        source_id: &str,
    ) -> LoaderResult<BindOutcome> {
        let (target_type, key) = match reference_target(reference) {
            Ok(target) => target,
            Err(reason) => {
                warn!(source = %source, source_id, %reason, "Skipping reference");
                return Ok(BindOutcome::Skipped { reason });
            }
        };

        let found = self
            .store
            .find_one(&target_type, &key.lookup_predicate(), &["id"])
            .await?;
        let found_id = found
            .as_ref()
            .and_then(|doc| doc.get("id"))
            .and_then(Value::as_str);

        match (found_id, reference.as_object_mut()) {
            (Some(target_id), Some(fields)) => {
                let literal = format!("{}/{}", target_type, target_id);
                info!(source = %source, source_id, reference = %literal, "Reference resolved");
                fields.insert("reference".to_string(), Value::String(literal.clone()));
                Ok(BindOutcome::Resolved { reference: literal })
            }
            _ => {
                let target = TargetKey::new(target_type, key);
                info!(source = %source, source_id, target = %target, "Caching reference");
                self.cache
                    .add_pending(target.clone(), source.clone(), source_id);
                Ok(BindOutcome::Deferred { target })
            }
        }
    }

    /// Discharges references waiting on the arriving document.
    ///
    /// The arriving document is not stored yet, so when it is itself one of the
    /// waiting sources the update is applied to it in place instead of in the store.
    async fn discharge_pending(
        &mut self,
        document: &mut Value,
        resource_type: &str,
        id: &str,
        identifiers: &[Value],
        report: &mut ResolutionReport,
    ) -> LoaderResult<()> {
        let literal = Value::String(format!("{}/{}", resource_type, id));
        let reference_field = FieldPath::default().child("reference");

        for (index, identifier) in identifiers.iter().enumerate() {
            let key = match Identifier::from_json(identifier).and_then(|i| i.canonicalize()) {
                Ok(key) => key,
                Err(err) => {
                    error!(resource_type, resource_id = id, index, %err, "Ignoring identifier");
                    report
                        .skipped_identifiers
                        .push(IdentifierSkip { index, error: err });
                    continue;
                }
            };

            let target = TargetKey::new(resource_type, key);
            let mut pending = self.cache.take_and_clear(&target).into_iter();
            let predicate = target.identifier.lookup_predicate();

            while let Some((source, source_ids)) = pending.next() {
                let condition = if source.is_array {
                    FieldCondition::ElemMatch {
                        path: source.path.clone(),
                        predicate: predicate.clone(),
                    }
                } else {
                    FieldCondition::Matches {
                        path: source.path.clone(),
                        predicate: predicate.clone(),
                    }
                };
                let is_self = source.resource_type == resource_type
                    && source_ids.iter().any(|source_id| source_id == id);
                let local = is_self.then(|| {
                    Filter::new()
                        .with_ids([id])
                        .with_condition(condition.clone())
                });
                let filter = Filter::new()
                    .with_ids(
                        source_ids
                            .iter()
                            .filter(|source_id| !(is_self && *source_id == id))
                            .cloned(),
                    )
                    .with_condition(condition);
                let update = Update::set(reference_field.clone(), literal.clone());

                info!(
                    target = %target,
                    source = %source,
                    sources = source_ids.len(),
                    "Discharging pending references"
                );
                let mut matched = match self
                    .store
                    .update_many(&source.resource_type, &filter, &update)
                    .await
                {
                    Ok(matched) => matched,
                    Err(err) => {
                        // Keep what was not discharged so the target's redelivery can retry.
                        let mut remaining = PendingSources::new();
                        remaining.insert(source, source_ids);
                        remaining.extend(pending);
                        self.cache.restore(target, remaining);
                        return Err(err.into());
                    }
                };

                if let Some(local) = &local
                    && local.matches(document)
                    && update.apply(document, local)
                {
                    matched += 1;
                }

                if matched == 0 {
                    warn!(target = %target, source = %source, "Discharge matched no documents");
                }
                report.discharges.push(DischargeOutcome {
                    target: target.clone(),
                    source,
                    source_ids,
                    matched,
                });
            }
        }

        Ok(())
    }
}

/// Extracts the target type and canonical identifier of a Reference value.
fn reference_target(reference: &Value) -> Result<(String, IdentifierKey), SkipReason> {
    if !reference.is_object() {
        return Err(SkipReason::InvalidReference(
            "expected a Reference object".to_string(),
        ));
    }
    let target_type = reference
        .get("type")
        .or_else(|| reference.get("resourceType"))
        .and_then(Value::as_str)
        .ok_or_else(|| SkipReason::InvalidReference("missing target type".to_string()))?;
    let identifier = reference
        .get("identifier")
        .ok_or_else(|| SkipReason::InvalidReference("missing identifier".to_string()))?;
    let key = Identifier::from_json(identifier)
        .and_then(|i| i.canonicalize())
        .map_err(SkipReason::InvalidIdentifier)?;
    Ok((target_type.to_string(), key))
}

/// Returns the (`resourceType`, `id`) of an ingested document.
fn document_identity(document: &Value) -> LoaderResult<(String, String)> {
    let field = |name: &str| {
        document
            .get(name)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| LoaderError::InvalidDocument {
                message: format!("missing string field '{}'", name),
            })
    };
    Ok((field("resourceType")?, field("id")?))
}
