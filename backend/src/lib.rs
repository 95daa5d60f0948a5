//! # Dietdata - fingerprinted dataset cache for diet recipes
//!
//! Dietdata keeps a cleaned copy of a recipes CSV in memory, rebuilds it
//! exactly when the file's content changes, and serves filtered/sorted/paginated
//! views plus cached aggregate statistics.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   CSV File  │────▶│   Loader    │────▶│   Cleaner   │────▶│ CacheStore  │
//! │ (any enc.)  │     │ (sha-256)   │     │ (dedup etc) │     │  (Arc swap) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!        ▲                                                           │
//!        │ tick / fs event / demand / clear                   ┌──────┴──────┐
//! ┌──────┴──────┐                                             │ Query/Stats │
//! │   Watcher   │                                             │  (readers)  │
//! └─────────────┘                                             └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::collections::HashMap;
//! use dietdata::{Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Engine::new(EngineConfig::new("data/All_Diets.csv"));
//!     let page = engine.fetch_dataset(&HashMap::new()).await.unwrap();
//!     println!("{} recipes", page.pagination.total_items);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Records, datasets and statistics snapshots
//! - [`parser`] - CSV decoding, parsing and the fingerprinting loader
//! - [`validation`] - Outlier ceilings
//! - [`transform`] - Cleaner and statistics
//! - [`query`] - Filter, sort and paginate
//! - [`cache`] - Snapshot store and disk mirror
//! - [`watcher`] - Change detection and single-flight rebuilds
//! - [`engine`] - The caller-facing operations
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;

// Parsing
pub mod parser;

// Cleaning and aggregation
pub mod transform;
pub mod validation;

// Queries
pub mod query;

// Caching
pub mod cache;
pub mod watcher;

// Operations
pub mod config;
pub mod engine;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    CacheError, CacheResult, EngineError, EngineResult, LoadError, LoadResult, ServerError,
    ServerResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    CleanRecord, CleanRecordView, Dataset, Fingerprint, Macros, RawRecord, StatisticsSnapshot,
};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, fingerprint_bytes, parse_bytes_auto,
    parse_csv, CsvError, CsvSource, LoadedSource, ParseResult,
};

// =============================================================================
// Re-exports - Cleaning, statistics, queries
// =============================================================================

pub use transform::{clean, clean_with_report, compute_statistics, CleanReport};
pub use query::{query, DatasetPage, Pagination, QueryRequest, SortField, SortOrder};

// =============================================================================
// Re-exports - Cache, watcher, engine
// =============================================================================

pub use cache::{CacheStore, DiskMirror, Slot};
pub use config::EngineConfig;
pub use engine::{Engine, HealthReport};
pub use watcher::{RefreshOutcome, Trigger, Watcher, WatcherState};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server};
}
