//! Categorical split tables
//!
//! - `LandUseSplit`: how a record's volume is shared among the codes it lists
//! - `SicConversion`: land-use code → SIC sector proportions
//! - `ShareTable`: per-MSOA category shares from count tables, used for
//!   dwelling types and traveller types
//! - `UnitConversions`: floor space per job and people per dwelling, for the
//!   jobs and population columns of the outputs

use crate::types::{normalize_code, Attribute, CodeField, LandUseCode, PlanningRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Category used when no mapping exists, so volume is conserved
pub const UNCLASSIFIED: &str = "unclassified";

// ============================================================================
// Land-use code weighting
// ============================================================================

/// Dataset-wide floor area per land-use code
///
/// Each valid record's observed floor area is shared evenly among the codes
/// of one field, then summed per code.
#[derive(Debug, Clone, Default)]
pub struct LandUseSplit {
    totals: HashMap<String, f64>,
    /// First spelling seen for each normalised code
    spellings: HashMap<String, LandUseCode>,
}

impl LandUseSplit {
    /// Totals for the proposed (GFA) or existing (existing GFA) field
    pub fn from_records(records: &[PlanningRecord], field: CodeField) -> Self {
        let mut totals: HashMap<String, f64> = HashMap::new();
        let mut spellings: HashMap<String, LandUseCode> = HashMap::new();
        for record in records.iter().filter(|r| r.is_valid()) {
            let area = match field {
                CodeField::Proposed => record.observed(Attribute::Gfa),
                CodeField::Existing => record.observed(Attribute::ExistingGfa),
            };
            let Some(area) = area.filter(|a| a.is_finite() && *a > 0.0) else {
                continue;
            };
            let codes = distinct_codes(record.codes(field));
            if codes.is_empty() {
                continue;
            }
            let share = area / codes.len() as f64;
            for code in codes {
                let key = code.normalized();
                *totals.entry(key.clone()).or_insert(0.0) += share;
                spellings.entry(key).or_insert(code);
            }
        }
        Self { totals, spellings }
    }

    pub fn total_for(&self, code: &LandUseCode) -> f64 {
        self.totals.get(&code.normalized()).copied().unwrap_or(0.0)
    }

    /// Shares of each listed code, summing to 1
    ///
    /// Proportional to the dataset totals; even when those are all zero.
    /// Empty when `codes` is empty.
    pub fn shares(&self, codes: &[LandUseCode]) -> Vec<(LandUseCode, f64)> {
        let codes = distinct_codes(codes);
        if codes.is_empty() {
            return Vec::new();
        }

        let totals: Vec<f64> = codes.iter().map(|c| self.total_for(c)).collect();
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            codes
                .into_iter()
                .zip(totals)
                .map(|(code, total)| (code, total / sum))
                .collect()
        } else {
            let even = 1.0 / codes.len() as f64;
            codes.into_iter().map(|code| (code, even)).collect()
        }
    }

    /// Average split over every code in the dataset, summing to 1
    ///
    /// Used for records that list no codes. Ordered by normalised code; empty
    /// when no record contributed floor area.
    pub fn average_shares(&self) -> Vec<(LandUseCode, f64)> {
        let sum: f64 = self.totals.values().sum();
        if sum <= 0.0 {
            return Vec::new();
        }
        let mut keys: Vec<&String> = self.totals.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| {
                let code = self.spellings.get(key)?.clone();
                Some((code, self.totals[key] / sum))
            })
            .collect()
    }
}

/// Codes in first-seen order, duplicates (by normalised key) removed
fn distinct_codes(codes: &[LandUseCode]) -> Vec<LandUseCode> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for code in codes.iter().filter(|c| !c.is_blank()) {
        let key = code.normalized();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(code.clone());
        }
    }
    out
}

// ============================================================================
// Land-use → SIC conversion
// ============================================================================

/// One row of the conversion table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SicConversionRow {
    pub land_use_code: String,
    pub sic_code: String,
    pub proportion: f64,
}

/// Land-use code → SIC sector proportions
#[derive(Debug, Clone, Default)]
pub struct SicConversion {
    by_code: HashMap<String, Vec<(String, f64)>>,
}

impl SicConversion {
    /// Build from rows; each code's proportions are rescaled to sum to 1
    pub fn from_rows(rows: impl IntoIterator<Item = SicConversionRow>) -> Self {
        let mut grouped: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for row in rows {
            if !row.proportion.is_finite() || row.proportion <= 0.0 {
                continue;
            }
            *grouped
                .entry(normalize_code(&row.land_use_code))
                .or_default()
                .entry(row.sic_code.trim().to_string())
                .or_insert(0.0) += row.proportion;
        }

        let mut by_code = HashMap::new();
        for (code, sectors) in grouped {
            let sum: f64 = sectors.values().sum();
            if (sum - 1.0).abs() > 1e-6 {
                warn!(
                    code = %code,
                    sum,
                    "SIC proportions do not sum to 1, rescaling"
                );
            }
            let shares = sectors
                .into_iter()
                .map(|(sic, proportion)| (sic, proportion / sum))
                .collect();
            by_code.insert(code, shares);
        }
        Self { by_code }
    }

    /// SIC shares for a code, `None` when the code has no mapping
    pub fn sectors(&self, code: &LandUseCode) -> Option<&[(String, f64)]> {
        self.by_code.get(&code.normalized()).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

// ============================================================================
// Per-MSOA category shares
// ============================================================================

/// One row of a per-MSOA count table
///
/// Dwelling tables may name the columns `dwelling_type`/`units`, traveller
/// tables `traveller_type`/`people`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsoaCountRow {
    pub msoa_id: String,
    #[serde(alias = "dwelling_type", alias = "traveller_type")]
    pub category: String,
    #[serde(alias = "units", alias = "people")]
    pub count: f64,
    /// Average occupancy, only read from the dwelling table
    #[serde(default)]
    pub pop_per_dwelling: Option<f64>,
}

/// Category shares per MSOA with an all-MSOA fallback
#[derive(Debug, Clone, Default)]
pub struct ShareTable {
    by_msoa: HashMap<String, Vec<(String, f64)>>,
    aggregate: Vec<(String, f64)>,
}

/// Shares looked up for one MSOA
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShareLookup<'a> {
    /// Shares from the MSOA's own counts
    Msoa(&'a [(String, f64)]),
    /// MSOA absent; shares over all MSOAs
    Aggregate(&'a [(String, f64)]),
    /// Table has no usable counts
    Empty,
}

impl ShareTable {
    pub fn from_rows(rows: impl IntoIterator<Item = MsoaCountRow>) -> Self {
        let mut counts: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for row in rows {
            if !row.count.is_finite() || row.count <= 0.0 {
                continue;
            }
            let category = row.category.trim().to_string();
            *counts
                .entry(row.msoa_id.trim().to_string())
                .or_default()
                .entry(category.clone())
                .or_insert(0.0) += row.count;
            *totals.entry(category).or_insert(0.0) += row.count;
        }

        let by_msoa = counts
            .into_iter()
            .map(|(msoa, categories)| (msoa, normalise(categories)))
            .collect();
        Self {
            by_msoa,
            aggregate: normalise(totals),
        }
    }

    pub fn lookup(&self, msoa_id: &str) -> ShareLookup<'_> {
        if let Some(shares) = self.by_msoa.get(msoa_id) {
            ShareLookup::Msoa(shares)
        } else if !self.aggregate.is_empty() {
            ShareLookup::Aggregate(&self.aggregate)
        } else {
            ShareLookup::Empty
        }
    }

    pub fn is_empty(&self) -> bool {
        self.aggregate.is_empty()
    }
}

fn normalise(counts: BTreeMap<String, f64>) -> Vec<(String, f64)> {
    let sum: f64 = counts.values().sum();
    if sum <= 0.0 {
        return Vec::new();
    }
    counts
        .into_iter()
        .map(|(category, count)| (category, count / sum))
        .collect()
}

/// Dwelling-type and traveller-type share tables
#[derive(Debug, Clone, Default)]
pub struct DemographicTables {
    pub dwelling_types: ShareTable,
    pub traveller_types: ShareTable,
}

// ============================================================================
// Jobs and population
// ============================================================================

/// One row of the employment density table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmploymentDensityRow {
    pub land_use_code: String,
    /// Floor space per full-time-equivalent job (sqm)
    #[serde(alias = "sqm_per_fte")]
    pub fte_floorspace: f64,
}

/// Floor space per job by land-use code
#[derive(Debug, Clone, Default)]
pub struct EmploymentDensity {
    by_code: HashMap<String, f64>,
}

impl EmploymentDensity {
    /// Build from rows; non-positive densities are skipped, repeats keep the last
    pub fn from_rows(rows: impl IntoIterator<Item = EmploymentDensityRow>) -> Self {
        let mut by_code = HashMap::new();
        for row in rows {
            if !row.fte_floorspace.is_finite() || row.fte_floorspace <= 0.0 {
                warn!(code = %row.land_use_code, density = row.fte_floorspace, "Unusable employment density skipped");
                continue;
            }
            by_code.insert(normalize_code(&row.land_use_code), row.fte_floorspace);
        }
        Self { by_code }
    }

    /// Jobs supported by `floor_space` sqm of `code`
    pub fn jobs(&self, code: &LandUseCode, floor_space: f64) -> Option<f64> {
        self.by_code
            .get(&code.normalized())
            .map(|sqm_per_job| floor_space / sqm_per_job)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// Average people per dwelling by MSOA and dwelling type
///
/// MSOAs absent from the table use the count-weighted average of each
/// dwelling type over all MSOAs.
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    by_msoa: HashMap<(String, String), f64>,
    aggregate: HashMap<String, f64>,
}

impl Occupancy {
    pub fn from_rows<'r>(rows: impl IntoIterator<Item = &'r MsoaCountRow>) -> Self {
        let mut by_msoa = HashMap::new();
        let mut weighted: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        for row in rows {
            let Some(occupancy) = row.pop_per_dwelling.filter(|p| p.is_finite() && *p > 0.0) else {
                continue;
            };
            let category = row.category.trim().to_string();
            by_msoa.insert((row.msoa_id.trim().to_string(), category.clone()), occupancy);
            if row.count.is_finite() && row.count > 0.0 {
                let entry = weighted.entry(category).or_insert((0.0, 0.0));
                entry.0 += occupancy * row.count;
                entry.1 += row.count;
            }
        }
        let aggregate = weighted
            .into_iter()
            .map(|(category, (people, dwellings))| (category, people / dwellings))
            .collect();
        Self { by_msoa, aggregate }
    }

    /// People living in `dwellings` dwellings of one type in one MSOA
    pub fn population(&self, msoa_id: &str, dwelling_type: &str, dwellings: f64) -> Option<f64> {
        self.by_msoa
            .get(&(msoa_id.to_string(), dwelling_type.to_string()))
            .or_else(|| self.aggregate.get(dwelling_type))
            .map(|occupancy| dwellings * occupancy)
    }

    pub fn is_empty(&self) -> bool {
        self.by_msoa.is_empty()
    }
}

/// Conversions from floor space and dwellings to jobs and population
#[derive(Debug, Clone, Default)]
pub struct UnitConversions {
    pub density: EmploymentDensity,
    pub occupancy: Occupancy,
}
