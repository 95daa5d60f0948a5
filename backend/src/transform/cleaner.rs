//! Raw rows to validated recipe records.
//!
//! Per row, in order:
//!
//! 1. skip rows without a recipe name or diet type
//! 2. skip repeats of an already seen `(recipe_name, diet_type)` pair
//! 3. parse macro grams, defaulting unparsable cells to 0
//! 4. skip outliers (see [`crate::validation`])
//! 5. normalize text and derive calories, total macros and the search key
//!
//! Output keeps input order. Cleaning is pure: identical input always
//! yields identical output, which is what makes fingerprint caching sound.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::models::{CleanRecord, Macros, RawRecord};
use crate::validation::validate_macros;

/// Source column holding the recipe name.
pub const COL_RECIPE_NAME: &str = "Recipe_name";
/// Source column holding the diet type.
pub const COL_DIET_TYPE: &str = "Diet_type";
/// Source column holding the cuisine type.
pub const COL_CUISINE_TYPE: &str = "Cuisine_type";
/// Source column holding protein grams.
pub const COL_PROTEIN: &str = "Protein(g)";
/// Source column holding carbohydrate grams.
pub const COL_CARBS: &str = "Carbs(g)";
/// Source column holding fat grams.
pub const COL_FAT: &str = "Fat(g)";

/// Outlier messages kept in a [`CleanReport`]; the rest are only counted.
pub const MAX_OUTLIER_NOTES: usize = 5;

static NON_SEARCHABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9\s]").expect("search key pattern is valid"));

/// Counters describing what a cleaning pass dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub input_rows: usize,
    pub missing_fields: usize,
    pub duplicates: usize,
    pub outliers: usize,
    pub kept: usize,
    /// `"<recipe>: <reason>"` for the first few outliers.
    pub outlier_notes: Vec<String>,
}

/// Clean raw rows into records.
pub fn clean(rows: &[RawRecord]) -> Vec<CleanRecord> {
    clean_with_report(rows).0
}

/// Clean raw rows and report how many were dropped at each step.
pub fn clean_with_report(rows: &[RawRecord]) -> (Vec<CleanRecord>, CleanReport) {
    let mut report = CleanReport {
        input_rows: rows.len(),
        ..CleanReport::default()
    };
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(rows.len());
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        let (Some(recipe_name), Some(diet_type)) =
            (field(row, COL_RECIPE_NAME), field(row, COL_DIET_TYPE))
        else {
            report.missing_fields += 1;
            continue;
        };

        let diet_type = normalize_label(diet_type);
        if !seen.insert((recipe_name.to_string(), diet_type.clone())) {
            report.duplicates += 1;
            continue;
        }

        let macros = Macros::new(
            parse_or_zero(field(row, COL_PROTEIN)),
            parse_or_zero(field(row, COL_CARBS)),
            parse_or_zero(field(row, COL_FAT)),
        );
        if let Err(reasons) = validate_macros(&macros) {
            let note = format!("{}: {}", recipe_name, reasons.join(", "));
            tracing::debug!(%note, "outlier skipped");
            if report.outlier_notes.len() < MAX_OUTLIER_NOTES {
                report.outlier_notes.push(note);
            }
            report.outliers += 1;
            continue;
        }

        let cuisine_type = field(row, COL_CUISINE_TYPE)
            .map(normalize_label)
            .unwrap_or_default();

        records.push(CleanRecord::new(recipe_name, diet_type, cuisine_type, macros));
    }

    report.kept = records.len();
    (records, report)
}

/// Parse a numeric source cell. Missing, unparsable, non-finite and
/// negative values all become 0.
///
/// This is the policy for *source data* only; malformed query bounds are
/// dropped instead (see [`crate::query::parse_bound`]).
pub fn parse_or_zero(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

/// Lowercase, keeping only ASCII letters, digits and whitespace.
pub fn search_key(text: &str) -> String {
    NON_SEARCHABLE.replace_all(&text.to_lowercase(), "").into_owned()
}

/// Trimmed and lowercased category label.
pub fn normalize_label(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Trimmed, non-empty cell for `column`, matching the header exactly
/// first and case-insensitively second.
fn field<'a>(row: &'a RawRecord, column: &str) -> Option<&'a str> {
    row.get(column)
        .or_else(|| {
            row.iter()
                .find(|(header, _)| header.eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
        })
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}
