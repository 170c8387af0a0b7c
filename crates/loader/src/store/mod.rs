//! Document store abstraction.
//!
//! The binder only needs two operations from the store that persists loaded
//! documents: a point lookup by predicate and a filtered single-field update.
//! `save` is used by the loading pipeline to persist each document after its
//! references have been bound.
//!
//! Two backends are provided:
//!
//! - [`InMemoryStore`] - a map guarded by a `parking_lot` lock, for tests and dry runs
//! - `SqliteStore` (feature `sqlite`) - documents as JSON rows in SQLite
//!
//! # Example
//!
//! ```
//! use helios_loader::store::{DocumentStore, InMemoryStore};
//! use helios_loader::identifier::Identifier;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = InMemoryStore::new();
//! store
//!     .save(json!({
//!         "resourceType": "Practitioner",
//!         "id": "q1",
//!         "identifier": [{"value": "123", "system": "sys1"}]
//!     }))
//!     .await
//!     .unwrap();
//!
//! let predicate = Identifier::with_value("123", "sys1").lookup_predicate().unwrap();
//! let found = store.find_one("Practitioner", &predicate, &["id"]).await.unwrap();
//! assert_eq!(found, Some(json!({"id": "q1"})));
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

mod memory;
pub mod query;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
pub use query::{Clause, FieldCondition, Filter, Predicate, Update};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteStoreConfig};

/// The document store collaborator.
///
/// Implementations must make `find_one` and `update_many` atomic per document.
/// Nothing beyond that is assumed: the binder re-validates identifiers during
/// discharge rather than relying on cross-call transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns a human-readable name for this store.
    fn backend_name(&self) -> &'static str;

    /// Returns the first document of `resource_type` satisfying `predicate`,
    /// restricted to the `projection` fields (all fields if empty).
    async fn find_one(
        &self,
        resource_type: &str,
        predicate: &Predicate,
        projection: &[&str],
    ) -> StoreResult<Option<Value>>;

    /// Reads a document by its storage key.
    async fn find_by_id(&self, resource_type: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Applies `update` to every document of `resource_type` selected by `filter`.
    ///
    /// Returns the number of documents matched by the filter.
    async fn update_many(
        &self,
        resource_type: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64>;

    /// Inserts or replaces a document, keyed by its `resourceType` and `id`.
    async fn save(&self, document: Value) -> StoreResult<()>;
}

/// Extracts the (`resourceType`, `id`) storage key of a document.
pub(crate) fn document_key(document: &Value) -> StoreResult<(String, String)> {
    let field = |name: &str| {
        document
            .get(name)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| StoreError::InvalidDocument {
                message: format!("missing string field '{}'", name),
            })
    };
    Ok((field("resourceType")?, field("id")?))
}
