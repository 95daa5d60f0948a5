//! Aggregate statistics over one dataset snapshot.
//!
//! [`compute`] is a pure function of the [`Dataset`]: grouping is by the
//! exact normalized label, rankings are stable (ties keep dataset order)
//! and an empty dataset yields zeroed aggregates instead of dividing by 0.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};

use crate::models::{
    CleanRecord, Dataset, GroupCount, MacroAverages, OverallStats, RankedRecipe,
    StatisticsSnapshot,
};

/// Cuisines listed in `recipes_by_cuisine`.
pub const TOP_CUISINES: usize = 20;

/// Recipes listed in each top-N ranking.
pub const TOP_RECIPES: usize = 10;

/// Compute the statistics snapshot for `dataset`.
pub fn compute(dataset: &Dataset) -> StatisticsSnapshot {
    let records = &dataset.records;
    let with_cuisine = || records.iter().filter(|r| !r.cuisine_type.is_empty());

    StatisticsSnapshot {
        total_recipes: records.len(),
        diet_types: dataset.diet_types(),
        cuisine_types: dataset.cuisine_types(),
        recipes_by_diet: group_counts(records.iter().map(|r| r.diet_type.as_str()), usize::MAX),
        recipes_by_cuisine: group_counts(with_cuisine().map(|r| r.cuisine_type.as_str()), TOP_CUISINES),
        avg_macros_by_diet: group_averages(records.iter().map(|r| (r.diet_type.as_str(), r))),
        avg_macros_by_cuisine: group_averages(with_cuisine().map(|r| (r.cuisine_type.as_str(), r))),
        overall_stats: overall(records),
        top_calorie_recipes: top_by(records, TOP_RECIPES, |r| r.calories)
            .map(|r| RankedRecipe {
                calories: Some(r.calories),
                ..ranked(r)
            })
            .collect(),
        high_protein_recipes: top_by(records, TOP_RECIPES, |r| r.protein_g)
            .map(|r| RankedRecipe {
                protein_g: Some(r.protein_g),
                ..ranked(r)
            })
            .collect(),
        fingerprint: dataset.fingerprint.clone(),
        computed_at: Utc::now(),
    }
}

/// Round half away from zero to 2 decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Count per label, largest first; equal counts keep first-seen order.
fn group_counts<'a>(labels: impl Iterator<Item = &'a str>, limit: usize) -> Vec<GroupCount> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<GroupCount> = Vec::new();

    for label in labels {
        match position.get(label) {
            Some(&i) => counts[i].count += 1,
            None => {
                position.insert(label, counts.len());
                counts.push(GroupCount {
                    name: label.to_string(),
                    count: 1,
                });
            }
        }
    }

    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(limit);
    counts
}

#[derive(Default)]
struct MacroSums {
    protein_g: f64,
    carbs_g: f64,
    fat_g: f64,
    calories: f64,
    count: usize,
}

impl MacroSums {
    fn add(&mut self, record: &CleanRecord) {
        self.protein_g += record.protein_g;
        self.carbs_g += record.carbs_g;
        self.fat_g += record.fat_g;
        self.calories += record.calories;
        self.count += 1;
    }

    fn averages(&self) -> MacroAverages {
        if self.count == 0 {
            return MacroAverages::default();
        }
        let n = self.count as f64;
        MacroAverages {
            protein_g: round2(self.protein_g / n),
            carbs_g: round2(self.carbs_g / n),
            fat_g: round2(self.fat_g / n),
            calories: round2(self.calories / n),
        }
    }
}

fn group_averages<'a>(
    groups: impl Iterator<Item = (&'a str, &'a CleanRecord)>,
) -> BTreeMap<String, MacroAverages> {
    let mut sums: BTreeMap<String, MacroSums> = BTreeMap::new();
    for (label, record) in groups {
        sums.entry(label.to_string()).or_default().add(record);
    }
    sums.into_iter()
        .map(|(label, sums)| (label, sums.averages()))
        .collect()
}

fn overall(records: &[CleanRecord]) -> OverallStats {
    if records.is_empty() {
        return OverallStats::default();
    }

    let mut sums = MacroSums::default();
    let mut max = MacroSums::default();
    for record in records {
        sums.add(record);
        max.protein_g = max.protein_g.max(record.protein_g);
        max.carbs_g = max.carbs_g.max(record.carbs_g);
        max.fat_g = max.fat_g.max(record.fat_g);
        max.calories = max.calories.max(record.calories);
    }

    let avg = sums.averages();
    OverallStats {
        avg_protein: avg.protein_g,
        avg_carbs: avg.carbs_g,
        avg_fat: avg.fat_g,
        avg_calories: avg.calories,
        max_protein: round2(max.protein_g),
        max_carbs: round2(max.carbs_g),
        max_fat: round2(max.fat_g),
        max_calories: round2(max.calories),
    }
}

/// The `n` records with the largest `key`, stable on ties.
fn top_by<'a>(
    records: &'a [CleanRecord],
    n: usize,
    key: impl Fn(&CleanRecord) -> f64,
) -> impl Iterator<Item = &'a CleanRecord> {
    let mut ranked: Vec<&CleanRecord> = records.iter().collect();
    ranked.sort_by(|a, b| key(*b).total_cmp(&key(*a)));
    ranked.truncate(n);
    ranked.into_iter()
}

fn ranked(record: &CleanRecord) -> RankedRecipe {
    RankedRecipe {
        recipe_name: record.recipe_name.clone(),
        diet_type: record.diet_type.clone(),
        cuisine_type: record.cuisine_type.clone(),
        calories: None,
        protein_g: None,
    }
}
