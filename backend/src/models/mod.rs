//! Domain models for the dataset cache engine.
//!
//! - [`RawRecord`] - one untyped source row (column name to cell text)
//! - [`CleanRecord`] - validated, typed recipe with derived fields
//! - [`Dataset`] - immutable, fingerprinted snapshot of clean records
//! - [`StatisticsSnapshot`] - aggregates computed from exactly one [`Dataset`]
//! - [`Fingerprint`] - content digest of the raw source

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::transform::cleaner::search_key;

// =============================================================================
// Fingerprint
// =============================================================================

/// Deterministic digest of the raw source content.
///
/// Two sources with byte-identical content always share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Raw Record
// =============================================================================

/// A source row as produced by the loader. No invariants.
pub type RawRecord = HashMap<String, String>;

// =============================================================================
// Macros
// =============================================================================

/// Macronutrient grams of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Macros {
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl Macros {
    pub fn new(protein_g: f64, carbs_g: f64, fat_g: f64) -> Self {
        Self { protein_g, carbs_g, fat_g }
    }

    /// Approximate energy: 4 kcal/g protein and carbs, 9 kcal/g fat.
    pub fn calories(&self) -> f64 {
        self.protein_g * 4.0 + self.carbs_g * 4.0 + self.fat_g * 9.0
    }

    pub fn total(&self) -> f64 {
        self.protein_g + self.carbs_g + self.fat_g
    }
}

// =============================================================================
// Clean Record
// =============================================================================

/// A validated recipe row.
///
/// `calories` and `total_macros` are always derived from the macro fields,
/// `search_key` from `recipe_name`. Use [`CleanRecordView`] for output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub recipe_name: String,
    pub diet_type: String,
    pub cuisine_type: String,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub calories: f64,
    pub total_macros: f64,
    pub search_key: String,
}

impl CleanRecord {
    /// Build a record from already-normalized text fields.
    pub fn new(
        recipe_name: impl Into<String>,
        diet_type: impl Into<String>,
        cuisine_type: impl Into<String>,
        macros: Macros,
    ) -> Self {
        let recipe_name = recipe_name.into();
        let search_key = search_key(&recipe_name);
        Self {
            recipe_name,
            diet_type: diet_type.into(),
            cuisine_type: cuisine_type.into(),
            protein_g: macros.protein_g,
            carbs_g: macros.carbs_g,
            fat_g: macros.fat_g,
            calories: macros.calories(),
            total_macros: macros.total(),
            search_key,
        }
    }

    pub fn macros(&self) -> Macros {
        Macros::new(self.protein_g, self.carbs_g, self.fat_g)
    }
}

/// Public shape of a record: everything but the internal `search_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecordView {
    pub recipe_name: String,
    pub diet_type: String,
    pub cuisine_type: String,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub calories: f64,
    pub total_macros: f64,
}

impl From<&CleanRecord> for CleanRecordView {
    fn from(record: &CleanRecord) -> Self {
        Self {
            recipe_name: record.recipe_name.clone(),
            diet_type: record.diet_type.clone(),
            cuisine_type: record.cuisine_type.clone(),
            protein_g: record.protein_g,
            carbs_g: record.carbs_g,
            fat_g: record.fat_g,
            calories: record.calories,
            total_macros: record.total_macros,
        }
    }
}

// =============================================================================
// Dataset
// =============================================================================

/// Immutable snapshot of the cleaned source.
///
/// Never mutated once published; a rebuild replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub records: Vec<CleanRecord>,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(records: Vec<CleanRecord>, fingerprint: Fingerprint) -> Self {
        Self {
            records,
            fingerprint,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted distinct diet types.
    pub fn diet_types(&self) -> Vec<String> {
        distinct(self.records.iter().map(|r| r.diet_type.as_str()))
    }

    /// Sorted distinct non-empty cuisine types.
    pub fn cuisine_types(&self) -> Vec<String> {
        distinct(
            self.records
                .iter()
                .map(|r| r.cuisine_type.as_str())
                .filter(|c| !c.is_empty()),
        )
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(String::from)
        .collect()
}

// =============================================================================
// Statistics Snapshot
// =============================================================================

/// Number of records in one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCount {
    pub name: String,
    pub count: usize,
}

/// Mean macros of a group, rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroAverages {
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub calories: f64,
}

/// Dataset-wide averages and maxima, rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OverallStats {
    pub avg_protein: f64,
    pub avg_carbs: f64,
    pub avg_fat: f64,
    pub avg_calories: f64,
    pub max_protein: f64,
    pub max_carbs: f64,
    pub max_fat: f64,
    pub max_calories: f64,
}

/// An entry of a top-N ranking. Only the ranked metric is filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecipe {
    pub recipe_name: String,
    pub diet_type: String,
    pub cuisine_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub protein_g: Option<f64>,
}

/// Aggregate view over exactly one [`Dataset`], tagged with its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total_recipes: usize,
    pub diet_types: Vec<String>,
    pub cuisine_types: Vec<String>,
    pub recipes_by_diet: Vec<GroupCount>,
    pub recipes_by_cuisine: Vec<GroupCount>,
    pub avg_macros_by_diet: BTreeMap<String, MacroAverages>,
    pub avg_macros_by_cuisine: BTreeMap<String, MacroAverages>,
    pub overall_stats: OverallStats,
    pub top_calorie_recipes: Vec<RankedRecipe>,
    pub high_protein_recipes: Vec<RankedRecipe>,
    pub fingerprint: Fingerprint,
    pub computed_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
