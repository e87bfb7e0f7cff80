//! Centralized error handling for the resumable dump engine
//!
//! Each layer owns a `thiserror` enum and converts into [`AppError`] at the
//! service boundary. The binary wraps everything in `anyhow` for reporting.
//!
//! # Error Categories
//!
//! - **Store Errors**: job state persistence (I/O, serialization, bad ids)
//! - **Source Errors**: catalog and row queries against the dumped database
//! - **Dump Errors**: output stream, schema emission and the external dump binary
//! - **Lock Errors**: the expiring semaphore backing store
//!
//! # Usage
//!
//! ```rust
//! use resumable_dump::errors::{AppError, AppResult};
//!
//! async fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for job store Results
pub type StoreResult<T> = Result<T, StoreError>;

/// Convenience type alias for dump source Results
pub type SourceResult<T> = Result<T, SourceError>;

/// Convenience type alias for dump writer Results
pub type DumpResult<T> = Result<T, DumpError>;

/// Convenience type alias for lock Results
pub type LockResult<T> = Result<T, LockError>;
