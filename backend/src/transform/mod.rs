//! Dataset transformation.
//!
//! - Cleaner: raw rows to validated, typed records
//! - Stats: aggregate statistics over a dataset snapshot

pub mod cleaner;
pub mod stats;

pub use cleaner::{clean, clean_with_report, parse_or_zero, search_key, CleanReport};
pub use stats::compute as compute_statistics;
