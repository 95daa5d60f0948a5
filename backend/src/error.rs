//! Error types for the dataset cache engine.
//!
//! The hierarchy follows the layers of the engine:
//!
//! - [`LoadError`] - the raw source could not be located, read or parsed
//! - [`CacheError`] - the optional shared cache backend misbehaved
//! - [`EngineError`] - what callers of the engine operations see
//! - [`ServerError`] - HTTP adapter errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.
//!
//! Malformed query parameters are deliberately absent: they never become
//! errors, the offending value is dropped or defaulted (see [`crate::query`]).

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Source Errors
// =============================================================================

/// Errors while loading the raw tabular source.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source file does not exist.
    #[error("Dataset file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The source exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The content is not parseable as delimited text.
    #[error("Invalid CSV: {0}")]
    Csv(#[from] crate::parser::CsvError),
}

impl LoadError {
    /// Build the right variant for an IO failure on `path`.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            LoadError::NotFound { path }
        } else {
            LoadError::Io { path, source }
        }
    }
}

// =============================================================================
// Cache Backend Errors
// =============================================================================

/// Errors from the shared cache backend (disk mirror).
///
/// These never fail a query: the engine logs them and keeps serving from
/// its in-process store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend location cannot be used.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// IO error.
    #[error("Cache backend IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored payload could not be (de)serialized.
    #[error("Cache backend JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Engine Errors (caller-visible)
// =============================================================================

/// Errors surfaced by the engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No usable snapshot and the source cannot be loaded.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] LoadError),

    /// Unexpected failure while cleaning or aggregating.
    #[error("Compute fault: {0}")]
    ComputeFault(String),

    /// Shared cache backend failure that could not be degraded around.
    #[error("{0}")]
    CacheBackendUnavailable(#[from] CacheError),
}

impl EngineError {
    /// Whether this error means the raw source is missing or unreadable.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, EngineError::SourceUnavailable(_))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::ComputeFault(format!("background task failed: {}", err))
    }
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Listener or transport failure outside any handler.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for source loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
