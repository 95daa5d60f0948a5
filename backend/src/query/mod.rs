//! Filter, sort and paginate a dataset snapshot.
//!
//! Requests are built from loose string parameters (`?diet_type=keto&page=2`).
//! Malformed values never fail a query:
//!
//! - an unparsable range bound (`min_protein=abc`) is dropped, the filter is not applied
//! - an unparsable `page` / `per_page` falls back to its default
//! - `per_page` is clamped to `[1, 100]`
//! - an unknown `sort_by` keeps dataset order
//!
//! Sorting is stable in both directions so identical requests always page
//! identically.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{CleanRecord, CleanRecordView, Dataset};
use crate::transform::cleaner::{normalize_label, search_key};

/// Page used when none (or an invalid one) is given.
pub const DEFAULT_PAGE: usize = 1;
/// Page size used when none (or an invalid one) is given.
pub const DEFAULT_PER_PAGE: usize = 20;
/// Largest accepted page size.
pub const MAX_PER_PAGE: usize = 100;

// =============================================================================
// Parameter parsing
// =============================================================================

/// Parse a range bound. Missing, unparsable or non-finite values mean
/// "no bound"; unlike source cells they are not turned into 0.
pub fn parse_bound(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parse a 1-based page number, defaulting to [`DEFAULT_PAGE`].
pub fn parse_page(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|page| *page >= 1)
        .unwrap_or(DEFAULT_PAGE)
}

/// Parse a page size, defaulting to [`DEFAULT_PER_PAGE`] and clamping
/// to `[1, MAX_PER_PAGE]`.
pub fn parse_per_page(value: Option<&str>) -> usize {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_PER_PAGE;
    };
    match raw.parse::<i64>() {
        Ok(n) => n.clamp(1, MAX_PER_PAGE as i64) as usize,
        // Too many digits for i64 is still a number, just a large one
        Err(_) if raw.chars().all(|c| c.is_ascii_digit()) => MAX_PER_PAGE,
        Err(_) => DEFAULT_PER_PAGE,
    }
}

fn parse_text(value: Option<&str>, normalize: fn(&str) -> String) -> Option<String> {
    value
        .map(|v| normalize(v.trim()).trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Filters
// =============================================================================

/// Inclusive numeric range; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// AND-combined record filters. `None` / unbounded means not applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    /// Exact diet type, already lowercased.
    pub diet_type: Option<String>,
    /// Exact cuisine type, already lowercased.
    pub cuisine_type: Option<String>,
    /// Substring of the search key, already normalized.
    pub search: Option<String>,
    pub protein: Bounds,
    pub carbs: Bounds,
    pub fat: Bounds,
    pub calories: Bounds,
}

impl Filters {
    pub fn matches(&self, record: &CleanRecord) -> bool {
        self.diet_type.as_ref().map_or(true, |d| record.diet_type == *d)
            && self.cuisine_type.as_ref().map_or(true, |c| record.cuisine_type == *c)
            && self.search.as_ref().map_or(true, |s| record.search_key.contains(s.as_str()))
            && self.protein.contains(record.protein_g)
            && self.carbs.contains(record.carbs_g)
            && self.fat.contains(record.fat_g)
            && self.calories.contains(record.calories)
    }
}

// =============================================================================
// Sorting
// =============================================================================

/// Sortable record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Protein,
    Carbs,
    Fat,
    Calories,
    RecipeName,
}

impl SortField {
    /// Parse a `sort_by` value; unknown names give `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "protein" => Some(Self::Protein),
            "carbs" => Some(Self::Carbs),
            "fat" => Some(Self::Fat),
            "calories" => Some(Self::Calories),
            "recipe_name" => Some(Self::RecipeName),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Protein => "protein",
            Self::Carbs => "carbs",
            Self::Fat => "fat",
            Self::Calories => "calories",
            Self::RecipeName => "recipe_name",
        }
    }

    fn compare(&self, a: &CleanRecord, b: &CleanRecord) -> Ordering {
        match self {
            Self::Protein => a.protein_g.total_cmp(&b.protein_g),
            Self::Carbs => a.carbs_g.total_cmp(&b.carbs_g),
            Self::Fat => a.fat_g.total_cmp(&b.fat_g),
            Self::Calories => a.calories.total_cmp(&b.calories),
            Self::RecipeName => a.recipe_name.cmp(&b.recipe_name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// `desc` (any case) is descending, everything else ascending.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

// =============================================================================
// Request
// =============================================================================

/// A fully parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub filters: Filters,
    pub sort: Option<Sort>,
    pub page: usize,
    pub per_page: usize,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            filters: Filters::default(),
            sort: None,
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl QueryRequest {
    /// Build a request from raw query-string parameters.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let get = |key: &str| params.get(key).map(String::as_str);
        let bounds = |name: &str| {
            Bounds::new(
                parse_bound(get(&format!("min_{}", name))),
                parse_bound(get(&format!("max_{}", name))),
            )
        };

        let sort = get("sort_by").and_then(SortField::parse).map(|field| Sort {
            field,
            order: get("sort_order").map(SortOrder::parse).unwrap_or_default(),
        });

        Self {
            filters: Filters {
                diet_type: parse_text(get("diet_type"), normalize_label),
                cuisine_type: parse_text(get("cuisine_type"), normalize_label),
                search: parse_text(get("search"), search_key),
                protein: bounds("protein"),
                carbs: bounds("carbs"),
                fat: bounds("fat"),
                calories: bounds("calories"),
            },
            sort,
            page: parse_page(get("page")),
            per_page: parse_per_page(get("per_page")),
        }
    }

    pub fn with_sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort = Some(Sort { field, order });
        self
    }

    pub fn with_page(mut self, page: usize, per_page: usize) -> Self {
        self.page = page.max(1);
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Page bookkeeping for a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: usize, per_page: usize, total_items: usize) -> Self {
        let total_pages = total_items.div_ceil(per_page.max(1));
        Self {
            page,
            per_page,
            total_items,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// One page of matching records, borrowed from the dataset.
#[derive(Debug)]
pub struct QueryResult<'a> {
    pub items: Vec<&'a CleanRecord>,
    pub total_items: usize,
    pub pagination: Pagination,
}

/// Run `request` against `dataset`.
pub fn query<'a>(dataset: &'a Dataset, request: &QueryRequest) -> QueryResult<'a> {
    let mut matched: Vec<&CleanRecord> = dataset
        .records
        .iter()
        .filter(|record| request.filters.matches(record))
        .collect();

    if let Some(sort) = request.sort {
        matched.sort_by(|a, b| {
            let ordering = sort.field.compare(a, b);
            match sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }

    // Fields are public, so a hand-built request may carry zeros
    let page = request.page.max(1);
    let per_page = request.per_page.max(1);

    let total_items = matched.len();
    let start = page.saturating_sub(1).saturating_mul(per_page).min(total_items);
    let end = start.saturating_add(per_page).min(total_items);
    let items = matched[start..end].to_vec();

    QueryResult {
        items,
        total_items,
        pagination: Pagination::new(page, per_page, total_items),
    }
}

// =============================================================================
// Response shape
// =============================================================================

/// Echo of the parsed request, as applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiltersApplied {
    pub diet_type: Option<String>,
    pub cuisine_type: Option<String>,
    pub search: Option<String>,
    pub min_protein: Option<f64>,
    pub max_protein: Option<f64>,
    pub min_carbs: Option<f64>,
    pub max_carbs: Option<f64>,
    pub min_fat: Option<f64>,
    pub max_fat: Option<f64>,
    pub min_calories: Option<f64>,
    pub max_calories: Option<f64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl From<&QueryRequest> for FiltersApplied {
    fn from(request: &QueryRequest) -> Self {
        let f = &request.filters;
        Self {
            diet_type: f.diet_type.clone(),
            cuisine_type: f.cuisine_type.clone(),
            search: f.search.clone(),
            min_protein: f.protein.min,
            max_protein: f.protein.max,
            min_carbs: f.carbs.min,
            max_carbs: f.carbs.max,
            min_fat: f.fat.min,
            max_fat: f.fat.max,
            min_calories: f.calories.min,
            max_calories: f.calories.max,
            sort_by: request.sort.map(|s| s.field.as_str().to_string()),
            sort_order: request.sort.map(|s| s.order.as_str().to_string()),
        }
    }
}

/// `fetch_dataset` response: `{data, pagination, filters_applied}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPage {
    pub data: Vec<CleanRecordView>,
    pub pagination: Pagination,
    pub filters_applied: FiltersApplied,
}

impl DatasetPage {
    pub fn build(dataset: &Dataset, request: &QueryRequest) -> Self {
        let result = query(dataset, request);
        Self {
            data: result.items.into_iter().map(CleanRecordView::from).collect(),
            pagination: result.pagination,
            filters_applied: FiltersApplied::from(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fingerprint, Macros};

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample() -> Dataset {
        let rows = [
            ("Chicken Curry", "paleo", "indian", 30.0, 10.0, 5.0),
            ("Beef Stew", "paleo", "french", 40.0, 20.0, 15.0),
            ("Tofu Bowl", "vegan", "asian", 20.0, 30.0, 5.0),
            ("Green Curry", "vegan", "asian", 10.0, 40.0, 20.0),
            ("Omelette", "keto", "french", 20.0, 2.0, 15.0),
        ];
        let records = rows
            .iter()
            .map(|(n, d, c, p, cb, f)| CleanRecord::new(*n, *d, *c, Macros::new(*p, *cb, *f)))
            .collect();
        Dataset::new(records, Fingerprint::new("fp"))
    }

    fn names(result: &QueryResult<'_>) -> Vec<String> {
        result.items.iter().map(|r| r.recipe_name.clone()).collect()
    }

    #[test]
    fn test_defaults() {
        let request = QueryRequest::from_params(&HashMap::new());
        assert_eq!(request, QueryRequest::default());

        let dataset = sample();
        let result = query(&dataset, &request);
        assert_eq!(result.total_items, 5);
        assert_eq!(names(&result)[0], "Chicken Curry");
        assert!(!result.pagination.has_next);
        assert!(!result.pagination.has_prev);
    }

    #[test]
    fn test_text_filters() {
        let dataset = sample();

        let request = QueryRequest::from_params(&params(&[("diet_type", " PALEO ")]));
        assert_eq!(query(&dataset, &request).total_items, 2);

        let request = QueryRequest::from_params(&params(&[("cuisine_type", "Asian"), ("search", "CURRY")]));
        assert_eq!(names(&query(&dataset, &request)), vec!["Green Curry"]);

        let request = QueryRequest::from_params(&params(&[("search", "  ")]));
        assert_eq!(request.filters.search, None);
    }

    #[test]
    fn test_range_filters_inclusive() {
        let dataset = sample();
        let request = QueryRequest::from_params(&params(&[("min_protein", "20"), ("max_protein", "30")]));
        let result = query(&dataset, &request);
        assert_eq!(names(&result), vec!["Chicken Curry", "Tofu Bowl", "Omelette"]);

        // Chicken Curry: 30*4 + 10*4 + 5*9 = 205
        let request = QueryRequest::from_params(&params(&[("max_calories", "205")]));
        assert!(names(&query(&dataset, &request)).contains(&"Chicken Curry".to_string()));
    }

    #[test]
    fn test_malformed_bound_is_dropped() {
        let request = QueryRequest::from_params(&params(&[("min_protein", "abc"), ("max_fat", "NaN")]));
        assert_eq!(request.filters.protein, Bounds::default());
        assert_eq!(request.filters.fat, Bounds::default());
        assert_eq!(query(&sample(), &request).total_items, 5);
    }

    #[test]
    fn test_pagination_params() {
        assert_eq!(parse_per_page(Some("100000")), MAX_PER_PAGE);
        assert_eq!(parse_per_page(Some("99999999999999999999999")), MAX_PER_PAGE);
        assert_eq!(parse_per_page(Some("0")), 1);
        assert_eq!(parse_per_page(Some("-5")), 1);
        assert_eq!(parse_per_page(Some("ten")), DEFAULT_PER_PAGE);
        assert_eq!(parse_per_page(None), DEFAULT_PER_PAGE);
        assert_eq!(parse_page(Some("0")), 1);
        assert_eq!(parse_page(Some("-1")), 1);
        assert_eq!(parse_page(Some("x")), 1);
        assert_eq!(parse_page(Some("3")), 3);
    }

    #[test]
    fn test_pages_cover_all_items() {
        let dataset = sample();
        for per_page in 1..=6 {
            let first = query(&dataset, &QueryRequest::default().with_page(1, per_page));
            let total_pages = first.pagination.total_pages;
            assert_eq!(total_pages, first.total_items.div_ceil(per_page));

            let seen: usize = (1..=total_pages + 1)
                .map(|page| query(&dataset, &QueryRequest::default().with_page(page, per_page)).items.len())
                .sum();
            assert_eq!(seen, first.total_items);
        }
    }

    #[test]
    fn test_page_flags() {
        let dataset = sample();
        let request = QueryRequest::default().with_page(2, 2);
        let result = query(&dataset, &request);
        assert_eq!(names(&result), vec!["Tofu Bowl", "Green Curry"]);
        assert!(result.pagination.has_next);
        assert!(result.pagination.has_prev);
        assert_eq!(result.pagination.total_pages, 3);

        let beyond = query(&dataset, &QueryRequest::default().with_page(9, 2));
        assert!(beyond.items.is_empty());
        assert!(!beyond.pagination.has_next);
    }

    #[test]
    fn test_zero_page_reads_first_page() {
        let dataset = sample();
        let request = QueryRequest {
            page: 0,
            per_page: 0,
            ..QueryRequest::default()
        };

        let result = query(&dataset, &request);
        assert_eq!(names(&result), vec!["Chicken Curry"]);
        assert_eq!(result.pagination.page, 1);
        assert_eq!(result.pagination.per_page, 1);
        assert!(!result.pagination.has_prev);
        assert!(result.pagination.has_next);
    }

    #[test]
    fn test_sort_is_stable_both_ways() {
        let dataset = sample();

        // Tofu Bowl and Omelette tie on protein (20)
        let asc = query(&dataset, &QueryRequest::default().with_sort(SortField::Protein, SortOrder::Asc));
        assert_eq!(
            names(&asc),
            vec!["Green Curry", "Tofu Bowl", "Omelette", "Chicken Curry", "Beef Stew"]
        );

        let desc = query(&dataset, &QueryRequest::default().with_sort(SortField::Protein, SortOrder::Desc));
        assert_eq!(
            names(&desc),
            vec!["Beef Stew", "Chicken Curry", "Tofu Bowl", "Omelette", "Green Curry"]
        );
    }

    #[test]
    fn test_sort_params() {
        let request = QueryRequest::from_params(&params(&[("sort_by", "recipe_name"), ("sort_order", "DESC")]));
        assert_eq!(names(&query(&sample(), &request))[0], "Tofu Bowl");

        let request = QueryRequest::from_params(&params(&[("sort_by", "sodium"), ("sort_order", "desc")]));
        assert_eq!(request.sort, None);
        assert_eq!(names(&query(&sample(), &request))[0], "Chicken Curry");

        let request = QueryRequest::from_params(&params(&[("sort_by", "fat"), ("sort_order", "sideways")]));
        assert_eq!(request.sort.map(|s| s.order), Some(SortOrder::Asc));
    }

    #[test]
    fn test_dataset_page_shape() {
        let request = QueryRequest::from_params(&params(&[
            ("diet_type", "vegan"),
            ("min_carbs", "bogus"),
            ("sort_by", "calories"),
        ]));
        let page = DatasetPage::build(&sample(), &request);
        let json = serde_json::to_value(&page).unwrap();

        assert_eq!(json["pagination"]["total_items"], 2);
        assert_eq!(json["filters_applied"]["diet_type"], "vegan");
        assert!(json["filters_applied"]["min_carbs"].is_null());
        assert_eq!(json["filters_applied"]["sort_order"], "asc");
        assert!(json["data"][0].get("search_key").is_none());
    }
}
