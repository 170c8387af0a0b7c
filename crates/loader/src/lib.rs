//! # helios-loader - Reference-Resolving FHIR Loader
//!
//! FHIR documents produced by the Helios ETL pipeline refer to each other by business
//! identifier (`{"type": "Practitioner", "identifier": {"system": ..., "value": ...}}`)
//! because the pipeline cannot know the server-assigned ids of other resources. This
//! crate turns those logical references into literal `Type/id` references as documents
//! are loaded, in whatever order they arrive.
//!
//! ## Features
//!
//! - **Immediate binding**: references whose target is already stored are rewritten
//!   on the spot
//! - **Deferred binding**: references to missing targets wait in a [`PendingCache`]
//!   and are discharged with one bulk update when the target arrives
//! - **Identifier canonicalization**: value/system and type-coded identifiers map to a
//!   single [`IdentifierKey`] used for both lookup and caching
//! - **Path addressing**: reference locations are given as dotted or bracketed paths
//!   (`generalPractitioner`, `contact[0].organization`)
//! - **Pluggable stores**: anything implementing [`DocumentStore`]; an in-memory store
//!   and an SQLite store (default `sqlite` feature) are included
//!
//! ## Quick Start
//!
//! ```
//! use helios_loader::{LoadRecord, Loader, InMemoryStore};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut loader = Loader::new(InMemoryStore::new());
//!
//! loader
//!     .load(LoadRecord::new(
//!         json!({
//!             "resourceType": "Patient",
//!             "id": "p1",
//!             "managingOrganization": {
//!                 "type": "Organization",
//!                 "identifier": {"value": "org-7", "system": "urn:example:orgs"}
//!             }
//!         }),
//!         ["managingOrganization"],
//!     ))
//!     .await?;
//!
//! loader
//!     .load(LoadRecord::new(
//!         json!({
//!             "resourceType": "Organization",
//!             "id": "o1",
//!             "identifier": [{"value": "org-7", "system": "urn:example:orgs"}]
//!         }),
//!         Vec::<String>::new(),
//!     ))
//!     .await?;
//!
//! let patient = loader.binder().store().get("Patient", "p1").unwrap();
//! assert_eq!(patient["managingOrganization"]["reference"], "Organization/o1");
//!
//! let (stats, pending) = loader.finish();
//! assert_eq!(stats.discharged, 1);
//! assert!(pending.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod binder;
pub mod cache;
pub mod config;
pub mod error;
pub mod identifier;
pub mod path;
pub mod pipeline;
pub mod report;
pub mod store;

pub use binder::ReferenceBinder;
pub use cache::{PendingCache, PendingSources, SourceKey, TargetKey};
pub use config::LoaderConfig;
pub use error::{IdentifierError, LoaderError, LoaderResult, PathError, StoreError, StoreResult};
pub use identifier::{Identifier, IdentifierKey};
pub use path::{FieldPath, Segment};
pub use pipeline::{LoadRecord, LoadStats, Loader};
pub use report::{BindOutcome, ResolutionReport, SkipReason};
pub use store::{DocumentStore, InMemoryStore};

#[cfg(feature = "sqlite")]
pub use store::{SqliteStore, SqliteStoreConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup. `RUST_LOG` takes precedence
/// over `level`.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_loader={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
