//! Error type definitions for the resumable dump engine
//!
//! The hierarchy mirrors the layers: store, source, dump writer, scheduling
//! and locks each have their own enum, all of which convert into
//! [`AppError`].

use crate::job_scheduling::SchedulingError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors (SeaORM)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Job store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Dump source errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Dump writer errors
    #[error("Dump error: {0}")]
    Dump(#[from] DumpError),

    /// Tick queue errors
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Semaphore errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Filesystem errors outside the dump stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation already in progress errors
    #[error("Operation already in progress: {operation_type} on {resource}")]
    OperationInProgress {
        operation_type: String,
        resource: String,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Job store specific errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failures while reading or writing state
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job identifiers are used as file names and must be plain tokens
    #[error("Invalid job id: {id}")]
    InvalidId { id: String },

    /// A stored document exists but does not describe a job
    #[error("Corrupt state for job {id}: {message}")]
    Corrupt { id: String, message: String },
}

/// Errors raised by a dump source
#[derive(Error, Debug)]
pub enum SourceError {
    /// Database errors from SeaORM
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A specific query failed
    #[error("Query failed: {query} - {message}")]
    QueryFailed { query: String, message: String },

    /// The requested table is not known to the source
    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    /// Connection URL could not be understood
    #[error("Invalid connection URL: {message}")]
    InvalidUrl { message: String },
}

/// Errors raised while producing the dump artifact
#[derive(Error, Debug)]
pub enum DumpError {
    /// Output stream failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source failures that abort the dump
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// The output artifact could not be opened
    #[error("Could not open dump file {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    /// The job has nothing to dump
    #[error("No tables to dump")]
    NoTables,

    /// Compressed output requested in a build without gzip support
    #[error("Gzip output requested but compression support is not compiled in")]
    CompressionUnavailable,

    /// The external dump binary could not be run
    #[error("Dump binary {binary} failed: {message}")]
    Binary { binary: PathBuf, message: String },
}

/// Semaphore backing store errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Database errors from SeaORM
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl AppError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S, id: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an operation in progress error
    pub fn operation_in_progress<S: Into<String>>(operation_type: S, resource: S) -> Self {
        Self::OperationInProgress {
            operation_type: operation_type.into(),
            resource: resource.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl SourceError {
    /// Create a query failed error
    pub fn query_failed<Q: Into<String>, M: Into<String>>(query: Q, message: M) -> Self {
        Self::QueryFailed {
            query: query.into(),
            message: message.into(),
        }
    }
}

impl DumpError {
    /// Create a binary failure error
    pub fn binary<P: Into<PathBuf>, M: Into<String>>(binary: P, message: M) -> Self {
        Self::Binary {
            binary: binary.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AppError::not_found("job", "abc123");
        assert_eq!(err.to_string(), "Not found: job with id abc123");

        let err = AppError::from(DumpError::NoTables);
        assert_eq!(err.to_string(), "Dump error: No tables to dump");
    }

    #[test]
    fn test_source_error_conversion_into_dump_error() {
        let source = SourceError::query_failed("SHOW TABLES", "gone away");
        let err: DumpError = source.into();
        assert!(matches!(err, DumpError::Source(SourceError::QueryFailed { .. })));
        assert!(err.to_string().contains("SHOW TABLES"));
    }
}
