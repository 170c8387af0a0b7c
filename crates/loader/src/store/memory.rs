//! In-memory document store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

use super::query::{Filter, Predicate, Update, project};
use super::{DocumentStore, document_key};

/// A document store keeping everything in process memory.
///
/// Documents are grouped by resource type and ordered by id, so `find_one`
/// returns the lowest matching id deterministically.
#[derive(Debug)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Returns a copy of a stored document.
    pub fn get(&self, resource_type: &str, id: &str) -> Option<Value> {
        self.documents
            .read()
            .get(resource_type)
            .and_then(|by_id| by_id.get(id))
            .cloned()
    }

    /// Returns the total number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().values().map(BTreeMap::len).sum()
    }

    /// Returns true if no document is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulates an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                backend_name: self.backend_name().to_string(),
                message: "store marked unavailable".to_string(),
            })
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn find_one(
        &self,
        resource_type: &str,
        predicate: &Predicate,
        projection: &[&str],
    ) -> StoreResult<Option<Value>> {
        self.check_available()?;
        let documents = self.documents.read();
        Ok(documents.get(resource_type).and_then(|by_id| {
            by_id
                .values()
                .find(|doc| predicate.matches(doc))
                .map(|doc| project(doc, projection))
        }))
    }

    async fn find_by_id(&self, resource_type: &str, id: &str) -> StoreResult<Option<Value>> {
        self.check_available()?;
        Ok(self.get(resource_type, id))
    }

    async fn update_many(
        &self,
        resource_type: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        self.check_available()?;
        let mut documents = self.documents.write();
        let Some(by_id) = documents.get_mut(resource_type) else {
            return Ok(0);
        };

        let mut matched = 0;
        for document in by_id.values_mut() {
            if filter.matches(document) {
                matched += 1;
                update.apply(document, filter);
            }
        }
        Ok(matched)
    }

    async fn save(&self, document: Value) -> StoreResult<()> {
        self.check_available()?;
        let (resource_type, id) = document_key(&document)?;
        self.documents
            .write()
            .entry(resource_type)
            .or_default()
            .insert(id, document);
        Ok(())
    }
}
