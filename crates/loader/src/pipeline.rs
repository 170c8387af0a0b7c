//! Loading pipeline.
//!
//! Wraps a [`ReferenceBinder`] and persists each document once its references have
//! been bound, so later documents can find it as a reference target.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::binder::ReferenceBinder;
use crate::cache::PendingCache;
use crate::error::{LoaderError, LoaderResult};
use crate::report::ResolutionReport;
use crate::store::DocumentStore;

/// One document produced by upstream extraction, with the paths of its references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRecord {
    /// The FHIR resource.
    pub resource: Value,
    /// Paths (relative to the resource root) holding references to resolve.
    #[serde(default)]
    pub reference_paths: Vec<String>,
}

impl LoadRecord {
    /// Creates a record.
    pub fn new<I, P>(resource: Value, reference_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            resource,
            reference_paths: reference_paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Running totals over everything a [`Loader`] has processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Documents saved.
    pub loaded: u64,
    /// Input lines or documents rejected without being saved.
    pub rejected: u64,
    /// References resolved at bind time.
    pub resolved: u64,
    /// References deferred to the pending cache.
    pub deferred: u64,
    /// References skipped.
    pub skipped: u64,
    /// Documents updated by discharges.
    pub discharged: u64,
}

impl LoadStats {
    fn record(&mut self, report: &ResolutionReport) {
        self.loaded += 1;
        self.resolved += report.resolved() as u64;
        self.deferred += report.deferred() as u64;
        self.skipped += report.skipped() as u64;
        self.discharged += report.discharged();
    }
}

/// Binds and persists documents one at a time.
#[derive(Debug)]
pub struct Loader<S> {
    binder: ReferenceBinder<S>,
    stats: LoadStats,
}

impl<S: DocumentStore> Loader<S> {
    /// Creates a loader over `store`.
    pub fn new(store: S) -> Self {
        Self {
            binder: ReferenceBinder::new(store),
            stats: LoadStats::default(),
        }
    }

    /// Returns the underlying binder.
    pub fn binder(&self) -> &ReferenceBinder<S> {
        &self.binder
    }

    /// Returns the totals so far.
    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Resolves the record's references, then saves the document.
    ///
    /// Returns the document as saved, with whatever references could be bound.
    pub async fn load(&mut self, record: LoadRecord) -> LoaderResult<(Value, ResolutionReport)> {
        let LoadRecord {
            resource: mut document,
            reference_paths,
        } = record;

        let report = self
            .binder
            .resolve_references(&mut document, reference_paths.as_slice())
            .await?;
        self.binder.store().save(document.clone()).await?;
        self.stats.record(&report);

        debug!(
            resolved = report.resolved(),
            deferred = report.deferred(),
            discharged = report.discharged(),
            "Document loaded"
        );
        Ok((document, report))
    }

    /// Loads every record of an NDJSON stream, one record per non-blank line.
    ///
    /// Lines that do not parse and documents that cannot be bound are logged and
    /// counted as rejected. Store and I/O errors abort the load.
    ///
    /// Once the stream is exhausted, `on_loaded` is called once per loaded document, in
    /// first-arrival order, with the document as currently stored. Documents therefore
    /// carry every reference discharged by records that came after them.
    pub async fn load_ndjson<R, F>(&mut self, reader: R, mut on_loaded: F) -> LoaderResult<LoadStats>
    where
        R: AsyncBufRead + Unpin + Send,
        F: FnMut(&Value) -> std::io::Result<()>,
    {
        let mut lines = reader.lines();
        let mut line_number = 0u64;
        let mut loaded_keys: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: LoadRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(line = line_number, error = %err, "Rejecting unparsable record");
                    self.stats.rejected += 1;
                    continue;
                }
            };

            match self.load(record).await {
                Ok((document, _)) => {
                    if let Some(key) = storage_key(&document)
                        && seen.insert(key.clone())
                    {
                        loaded_keys.push(key);
                    }
                }
                Err(err @ (LoaderError::Store(_) | LoaderError::Io(_))) => return Err(err),
                Err(err) => {
                    warn!(line = line_number, error = %err, "Rejecting record");
                    self.stats.rejected += 1;
                }
            }
        }

        info!(
            lines = line_number,
            loaded = self.stats.loaded,
            rejected = self.stats.rejected,
            "Finished reading input"
        );

        let store = self.binder.store();
        for (resource_type, id) in &loaded_keys {
            match store.find_by_id(resource_type, id).await? {
                Some(document) => on_loaded(&document)?,
                None => warn!(
                    resource_type = %resource_type,
                    resource_id = %id,
                    "Loaded document missing from store"
                ),
            }
        }
        Ok(self.stats)
    }

    /// Tears the loader down, returning the totals and the references never discharged.
    pub fn finish(self) -> (LoadStats, PendingCache) {
        (self.stats, self.binder.finish())
    }
}

fn storage_key(document: &Value) -> Option<(String, String)> {
    let field = |name: &str| document.get(name).and_then(Value::as_str).map(String::from);
    Some((field("resourceType")?, field("id")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_load_record_wire_format() {
        let record: LoadRecord = serde_json::from_str(
            r#"{"resource": {"resourceType": "Patient", "id": "p1"}, "referencePaths": ["generalPractitioner"]}"#,
        )
        .unwrap();
        assert_eq!(record.reference_paths, vec!["generalPractitioner"]);

        let bare: LoadRecord =
            serde_json::from_str(r#"{"resource": {"resourceType": "Patient", "id": "p2"}}"#)
                .unwrap();
        assert!(bare.reference_paths.is_empty());
    }

    #[tokio::test]
    async fn test_load_saves_document() {
        let mut loader = Loader::new(InMemoryStore::new());
        let record = LoadRecord::new(
            json!({"resourceType": "Practitioner", "id": "q1"}),
            Vec::<String>::new(),
        );
        loader.load(record).await.unwrap();

        assert!(loader.binder().store().get("Practitioner", "q1").is_some());
        assert_eq!(loader.stats().loaded, 1);
    }

    #[tokio::test]
    async fn test_load_ndjson_skips_blank_lines() {
        let input = "\n{\"resource\": {\"resourceType\": \"Patient\", \"id\": \"p1\"}}\n   \n";
        let mut loader = Loader::new(InMemoryStore::new());
        let mut seen = Vec::new();
        let stats = loader
            .load_ndjson(input.as_bytes(), |doc| {
                seen.push(doc["id"].clone());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.rejected, 0);
        assert_eq!(seen, vec![json!("p1")]);
    }

    #[tokio::test]
    async fn test_load_ndjson_aborts_on_store_error() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let mut loader = Loader::new(store);
        let input = "{\"resource\": {\"resourceType\": \"Patient\", \"id\": \"p1\"}}\n";

        let err = loader
            .load_ndjson(input.as_bytes(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Store(_)));
    }
}
