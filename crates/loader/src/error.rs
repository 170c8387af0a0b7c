//! Error types for the loader.
//!
//! Identifier and path errors are recovered locally by the binder (the offending
//! reference is skipped and reported), while store errors always propagate to the
//! caller, which owns the retry policy.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for loader operations.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The ingested document lacks the fields every document must carry.
    #[error("invalid document: {message}")]
    InvalidDocument { message: String },

    /// Identifier errors
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    /// Path addressing errors
    #[error(transparent)]
    PathNotFound(#[from] PathError),

    /// Document store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while canonicalizing an identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Neither or both of the (value, system) and (type code, type system) pairs are present.
    #[error(
        "invalid identifier: {identifier}: identifier.value and identifier.system \
         or identifier.type are required and mutually exclusive"
    )]
    NotExactlyOne { identifier: String },

    /// The identifier is not an object, or one of its fields has the wrong type.
    #[error("malformed identifier at {field}: {message}")]
    Malformed { field: String, message: String },
}

/// Errors raised by path parsing and traversal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path string could not be parsed.
    #[error("malformed path '{path}': {message}")]
    Malformed { path: String, message: String },

    /// A segment of the path is absent or the value there has the wrong shape.
    #[error("path not found: '{path}' (failed at segment '{segment}')")]
    NotFound { path: String, segment: String },
}

/// Errors originating from the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store is currently unavailable.
    #[error("document store unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Internal store error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// The document cannot be stored (missing `resourceType` or `id`).
    #[error("document cannot be stored: {message}")]
    InvalidDocument { message: String },
}

/// Result type alias for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Result type alias for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
        }
    }
}
