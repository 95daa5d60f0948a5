//! Plausibility rules for recipe macros.
//!
//! A recipe whose macro grams reach any of the ceilings below is treated
//! as a data-entry outlier and discarded rather than clamped.
//!
//! | Field       | Ceiling (exclusive) |
//! |-------------|---------------------|
//! | `protein_g` | 2000                |
//! | `carbs_g`   | 3000                |
//! | `fat_g`     | 2000                |
//!
//! # Example
//!
//! ```rust,ignore
//! use dietdata::models::Macros;
//! use dietdata::validation::validate_macros;
//!
//! assert!(validate_macros(&Macros::new(10.0, 10.0, 10.0)).is_ok());
//! assert!(validate_macros(&Macros::new(10.0, 3000.0, 5.0)).is_err());
//! ```

use crate::models::Macros;

/// Protein ceiling in grams.
pub const MAX_PROTEIN_G: f64 = 2000.0;

/// Carbohydrate ceiling in grams.
pub const MAX_CARBS_G: f64 = 3000.0;

/// Fat ceiling in grams.
pub const MAX_FAT_G: f64 = 2000.0;

/// Check macros against the outlier ceilings.
///
/// # Returns
/// * `Ok(())` if every field is below its ceiling
/// * `Err(Vec<String>)` with one message per offending field
pub fn validate_macros(macros: &Macros) -> Result<(), Vec<String>> {
    let checks = [
        ("protein_g", macros.protein_g, MAX_PROTEIN_G),
        ("carbs_g", macros.carbs_g, MAX_CARBS_G),
        ("fat_g", macros.fat_g, MAX_FAT_G),
    ];

    let errors: Vec<String> = checks
        .iter()
        .filter(|(_, value, ceiling)| value >= ceiling)
        .map(|(field, value, ceiling)| format!("{} = {} reaches limit {}", field, value, ceiling))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
