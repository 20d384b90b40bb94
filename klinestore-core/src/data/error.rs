//! Structured error types for store operations.
//!
//! Displayable in both CLI and log contexts. Every failure propagates to the
//! immediate caller; nothing in the core retries.

use super::schema::SchemaError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("no partitions found for field='{field}' in {start}~{end}")]
    NoData {
        field: String,
        start: String,
        end: String,
    },

    #[error("schema error in {}: {source}", .path.display())]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },

    #[error("csv error in {}: {message}", .path.display())]
    Csv { path: PathBuf, message: String },

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("dataframe operation failed: {0}")]
    Frame(String),

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn schema(path: impl Into<PathBuf>, source: SchemaError) -> Self {
        StoreError::Schema {
            path: path.into(),
            source,
        }
    }
}
