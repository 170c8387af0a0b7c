//! SQLite document store.
//!
//! Documents are kept as JSON text in a single `documents` table keyed by
//! `(resource_type, id)`. Predicates and filters are evaluated in Rust over the
//! decoded rows, which keeps matching semantics identical to the in-memory store.
//!
//! # Example
//!
//! ```no_run
//! use helios_loader::store::SqliteStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::open("river.db")?;
//! store.init_schema()?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

use super::query::{Filter, Predicate, Update, project};
use super::{DocumentStore, document_key};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Configuration for the SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Maximum number of connections in the pool (forced to 1 for `:memory:`).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    4
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

/// A document store backed by SQLite.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteStoreConfig,
    is_memory: bool,
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Creates a new in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_config(":memory:", SqliteStoreConfig::default())
    }

    /// Opens or creates a file-based store.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::with_config(path, SqliteStoreConfig::default())
    }

    /// Creates a store with custom configuration.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteStoreConfig) -> StoreResult<Self> {
        let is_memory = path.as_ref().to_string_lossy() == ":memory:";

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let enable_wal = config.enable_wal && !is_memory;
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if enable_wal {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            }
            Ok(())
        });

        // Every connection to ":memory:" is a distinct database.
        let max_size = if is_memory { 1 } else { config.max_connections.max(1) };

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| StoreError::Unavailable {
                backend_name: "sqlite".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            pool,
            config,
            is_memory,
        })
    }

    /// Initializes the database schema.
    pub fn init_schema(&self) -> StoreResult<()> {
        let conn = self.get_connection()?;
        initialize_schema(&conn)
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Reads a stored document.
    pub fn get(&self, resource_type: &str, id: &str) -> StoreResult<Option<Value>> {
        let conn = self.get_connection()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE resource_type = ?1 AND id = ?2",
                params![resource_type, id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| serde_json::from_str(&data).map_err(StoreError::from))
            .transpose()
    }

    /// Returns the number of stored documents.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_connection(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn find_one(
        &self,
        resource_type: &str,
        predicate: &Predicate,
        projection: &[&str],
    ) -> StoreResult<Option<Value>> {
        let conn = self.get_connection()?;
        let mut stmt =
            conn.prepare("SELECT data FROM documents WHERE resource_type = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![resource_type], |row| row.get::<_, String>(0))?;

        for row in rows {
            let document: Value = serde_json::from_str(&row?)?;
            if predicate.matches(&document) {
                return Ok(Some(project(&document, projection)));
            }
        }
        Ok(None)
    }

    async fn find_by_id(&self, resource_type: &str, id: &str) -> StoreResult<Option<Value>> {
        self.get(resource_type, id)
    }

    async fn update_many(
        &self,
        resource_type: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let candidates = select_candidates(&tx, resource_type, filter.ids())?;
        let now = Utc::now().to_rfc3339();
        let mut matched = 0;
        for (id, data) in candidates {
            let mut document: Value = serde_json::from_str(&data)?;
            if !filter.matches(&document) {
                continue;
            }
            matched += 1;
            if update.apply(&mut document, filter) {
                tx.execute(
                    "UPDATE documents SET data = ?1, last_updated = ?2
                     WHERE resource_type = ?3 AND id = ?4",
                    params![serde_json::to_string(&document)?, now, resource_type, id],
                )?;
            }
        }

        tx.commit()?;
        Ok(matched)
    }

    async fn save(&self, document: Value) -> StoreResult<()> {
        let (resource_type, id) = document_key(&document)?;
        let data = serde_json::to_string(&document)?;
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO documents (resource_type, id, data, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(resource_type, id) DO UPDATE SET
                data = excluded.data,
                last_updated = excluded.last_updated",
            params![resource_type, id, data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Loads `(id, data)` rows of a resource type, narrowed to `ids` when given.
fn select_candidates(
    conn: &Connection,
    resource_type: &str,
    ids: Option<&[String]>,
) -> StoreResult<Vec<(String, String)>> {
    match ids {
        Some([]) => Ok(Vec::new()),
        Some(ids) => {
            // One JSON array parameter keeps large id sets under SQLite's variable limit.
            let mut stmt = conn.prepare(
                "SELECT id, data FROM documents
                 WHERE resource_type = ?1 AND id IN (SELECT value FROM json_each(?2))",
            )?;
            let ids = serde_json::to_string(ids)?;
            let rows = stmt.query_map(params![resource_type, ids], read_row)?;
            Ok(rows.collect::<Result<_, _>>()?)
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT id, data FROM documents WHERE resource_type = ?1")?;
            let rows = stmt.query_map(params![resource_type], read_row)?;
            Ok(rows.collect::<Result<_, _>>()?)
        }
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

/// Initializes the database schema.
fn initialize_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    if version.unwrap_or(0) < SCHEMA_VERSION {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                resource_type TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (resource_type, id)
            );
            DELETE FROM schema_version;",
        )?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
        tracing::debug!(version = SCHEMA_VERSION, "Initialized SQLite document schema");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FieldPath;
    use crate::store::FieldCondition;
    use serde_json::json;

    fn create_store() -> SqliteStore {
        let store = SqliteStore::in_memory().expect("Failed to create SQLite store");
        store.init_schema().expect("Failed to initialize schema");
        store
    }

    #[test]
    fn test_in_memory_store() {
        let store = create_store();
        assert!(store.is_memory());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let store = create_store();
        assert!(store.init_schema().is_ok());
    }

    #[tokio::test]
    async fn test_save_find_and_update() {
        let store = create_store();
        store
            .save(json!({
                "resourceType": "Practitioner",
                "id": "q1",
                "identifier": [{"value": "123", "system": "sys1"}]
            }))
            .await
            .unwrap();
        store
            .save(json!({
                "resourceType": "Patient",
                "id": "p1",
                "generalPractitioner": [
                    {"type": "Practitioner", "identifier": {"value": "123", "system": "sys1"}}
                ]
            }))
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let predicate = Predicate::new()
            .with(FieldPath::parse("identifier.value").unwrap(), "123")
            .with(FieldPath::parse("identifier.system").unwrap(), "sys1");

        let found = store
            .find_one("Practitioner", &predicate, &["id"])
            .await
            .unwrap();
        assert_eq!(found, Some(json!({"id": "q1"})));

        let filter = Filter::new()
            .with_ids(["p1"])
            .with_condition(FieldCondition::ElemMatch {
                path: FieldPath::parse("generalPractitioner").unwrap(),
                predicate,
            });
        let update = Update::set(
            FieldPath::parse("reference").unwrap(),
            json!("Practitioner/q1"),
        );
        let matched = store.update_many("Patient", &filter, &update).await.unwrap();
        assert_eq!(matched, 1);

        let patient = store.get("Patient", "p1").unwrap().unwrap();
        assert_eq!(
            patient["generalPractitioner"][0]["reference"],
            "Practitioner/q1"
        );
    }

    #[tokio::test]
    async fn test_update_many_with_empty_ids() {
        let store = create_store();
        let filter = Filter::new().with_ids(Vec::<String>::new());
        let update = Update::set(FieldPath::parse("active").unwrap(), json!(true));
        assert_eq!(store.update_many("Patient", &filter, &update).await.unwrap(), 0);
    }
}
