//! Build-Out Disaggregator
//!
//! Expands each valid, infilled record into volumes keyed by
//! `(MSOA, category, use state)`.
//!
//! # Architecture
//! Three splits are applied in turn:
//! 1. **Spatial:** MSOA weights from the `GeographyProvider`, summing to 1
//! 2. **Categorical:**
//!    - employment floor area: codes weighted by `LandUseSplit`, then each
//!      code across SIC sectors by `SicConversion`. A record listing no
//!      codes takes the average split over every code in the dataset.
//!    - dwellings: dwelling-type shares × traveller-type shares of the MSOA
//! 3. **Use state:** the proposed volume, plus the existing floor area
//!    multiplied by the demolition dampener for non-greenfield sites
//!
//! Every split is a set of shares summing to 1, so per record the proposed
//! volumes sum to the proposed attribute and the existing volumes to
//! `existing_gfa × dampener`. Missing mappings route volume to the
//! `unclassified` category rather than dropping it.
//!
//! Output rows also carry jobs (floor space over the land-use density) and
//! population (dwellings times MSOA occupancy) where the conversion tables
//! cover the row. These columns are derived and never rescaled.
//!
//! Invalid records are omitted entirely and reported in the audit trail.

pub mod build_out;
pub mod geography;
pub mod proportions;

pub use geography::{spatial_split, GeographyProvider, LookupGeography, MsoaWeight, SpatialSplit};
pub use proportions::{
    DemographicTables, EmploymentDensity, EmploymentDensityRow, LandUseSplit, MsoaCountRow,
    Occupancy, ShareLookup, ShareTable, SicConversion, SicConversionRow, UnitConversions,
    UNCLASSIFIED,
};

use crate::audit::{AuditEvent, AuditTrail};
use crate::error::{PipelineError, PipelineResult};
use crate::statistics::DisaggregationStats;
use crate::types::{Attribute, CodeField, LandUseCode, PlanningRecord};
use dlit_common::config::YearRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

// ============================================================================
// Keys and rows
// ============================================================================

/// Proposed build-out or the floor space it replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseState {
    Proposed,
    Existing,
}

impl UseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Existing => "existing",
        }
    }
}

impl fmt::Display for UseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sector or demographic dimension of a volume
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "sector", rename_all = "snake_case")]
pub enum Category {
    /// Floor area (sqm) by land-use code and SIC sector
    Employment { land_use: LandUseCode, sic: String },
    /// Dwellings by dwelling type and traveller type
    Residential {
        dwelling_type: String,
        traveller_type: String,
    },
}

impl Category {
    pub fn sector(&self) -> &'static str {
        match self {
            Self::Employment { .. } => "employment",
            Self::Residential { .. } => "residential",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Employment { .. } => "sqm",
            Self::Residential { .. } => "dwellings",
        }
    }
}

/// Output key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisaggregationKey {
    pub msoa_id: String,
    pub category: Category,
    pub use_state: UseState,
}

impl DisaggregationKey {
    /// Jobs or population equivalent of `volume` under this key
    fn converted(&self, volume: f64, conversions: &UnitConversions) -> (Option<f64>, Option<f64>) {
        match &self.category {
            Category::Employment { land_use, .. } => {
                (conversions.density.jobs(land_use, volume), None)
            }
            Category::Residential { dwelling_type, .. } => (
                None,
                conversions
                    .occupancy
                    .population(&self.msoa_id, dwelling_type, volume),
            ),
        }
    }
}

/// One volume entry attributed to one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeEntry {
    pub site_ref: String,
    pub key: DisaggregationKey,
    pub volume: f64,
}

/// Flat row of the volume table, as written to CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRow {
    pub msoa_id: String,
    pub sector: String,
    pub land_use_code: String,
    pub sic_code: String,
    pub dwelling_type: String,
    pub traveller_type: String,
    pub use_state: UseState,
    pub unit: String,
    pub volume: f64,
    /// Full-time-equivalent jobs, employment rows with a known density only
    pub jobs: Option<f64>,
    /// Residents, residential rows with a known occupancy only
    pub population: Option<f64>,
}

impl VolumeRow {
    fn new(key: &DisaggregationKey, volume: f64, conversions: &UnitConversions) -> Self {
        let (land_use_code, sic_code, dwelling_type, traveller_type) = match &key.category {
            Category::Employment { land_use, sic } => {
                (land_use.to_string(), sic.clone(), String::new(), String::new())
            }
            Category::Residential {
                dwelling_type,
                traveller_type,
            } => (
                String::new(),
                String::new(),
                dwelling_type.clone(),
                traveller_type.clone(),
            ),
        };
        let (jobs, population) = key.converted(volume, conversions);
        Self {
            msoa_id: key.msoa_id.clone(),
            sector: key.category.sector().to_string(),
            land_use_code,
            sic_code,
            dwelling_type,
            traveller_type,
            use_state: key.use_state,
            unit: key.category.unit().to_string(),
            volume,
            jobs,
            population,
        }
    }
}

/// Flat row of the yearly build-out profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub year: i32,
    pub msoa_id: String,
    pub sector: String,
    pub land_use_code: String,
    pub sic_code: String,
    pub dwelling_type: String,
    pub traveller_type: String,
    pub use_state: UseState,
    pub unit: String,
    pub volume: f64,
    pub jobs: Option<f64>,
    pub population: Option<f64>,
}

impl ProfileRow {
    fn new(year: i32, row: VolumeRow) -> Self {
        Self {
            year,
            msoa_id: row.msoa_id,
            sector: row.sector,
            land_use_code: row.land_use_code,
            sic_code: row.sic_code,
            dwelling_type: row.dwelling_type,
            traveller_type: row.traveller_type,
            use_state: row.use_state,
            unit: row.unit,
            volume: row.volume,
            jobs: row.jobs,
            population: row.population,
        }
    }
}

/// Proposed jobs and population over a set of rows
pub fn converted_totals(rows: &[VolumeRow]) -> (f64, f64) {
    rows.iter()
        .filter(|row| row.use_state == UseState::Proposed)
        .fold((0.0, 0.0), |(jobs, population), row| {
            (
                jobs + row.jobs.unwrap_or(0.0),
                population + row.population.unwrap_or(0.0),
            )
        })
}

/// All volume entries of a run
#[derive(Debug, Clone, Default)]
pub struct VolumeTable {
    entries: Vec<VolumeEntry>,
}

impl VolumeTable {
    pub fn entries(&self) -> &[VolumeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one record
    pub fn for_site<'a>(&'a self, site_ref: &'a str) -> impl Iterator<Item = &'a VolumeEntry> {
        self.entries.iter().filter(move |e| e.site_ref == site_ref)
    }

    /// Total volume per key over all records
    pub fn aggregate(&self) -> BTreeMap<DisaggregationKey, f64> {
        let mut totals = BTreeMap::new();
        for entry in &self.entries {
            *totals.entry(entry.key.clone()).or_insert(0.0) += entry.volume;
        }
        totals
    }

    /// Aggregated table as flat rows with jobs and population filled in
    pub fn rows(&self, conversions: &UnitConversions) -> Vec<VolumeRow> {
        self.aggregate()
            .iter()
            .map(|(key, volume)| VolumeRow::new(key, *volume, conversions))
            .collect()
    }

    pub fn total(&self, use_state: UseState) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.key.use_state == use_state)
            .map(|e| e.volume)
            .sum()
    }
}

// ============================================================================
// Disaggregator
// ============================================================================

/// Shares of one record across categories, with unmapped keys noted
struct CategoryShares {
    shares: Vec<(Category, f64)>,
    unmapped: Vec<(&'static str, String)>,
    /// Record listed no codes; the dataset average split was used
    averaged: bool,
}

/// Volume entries of one record and the decisions made producing them
#[derive(Debug, Clone, PartialEq)]
pub struct RecordVolumes {
    pub entries: Vec<VolumeEntry>,
    pub split: SpatialSplit,
    /// (dimension, key) pairs routed to `unclassified`
    pub unmapped: Vec<(&'static str, String)>,
    /// Code fields spread by the average land-use split
    pub averaged: Vec<CodeField>,
    /// Attributes left out because their value was negative or not finite
    pub skipped: Vec<(Attribute, f64)>,
}

/// Lookup tables and parameters for one run
pub struct Disaggregator<'a> {
    geography: &'a dyn GeographyProvider,
    sic: &'a SicConversion,
    demographics: &'a DemographicTables,
    proposed_split: LandUseSplit,
    existing_split: LandUseSplit,
    dampener: f64,
}

impl<'a> Disaggregator<'a> {
    /// Build a disaggregator; code weights are derived from `records`
    ///
    /// Fails with `Configuration` when the dampener is outside [0, 1].
    pub fn new(
        geography: &'a dyn GeographyProvider,
        sic: &'a SicConversion,
        demographics: &'a DemographicTables,
        records: &[PlanningRecord],
        dampener: f64,
    ) -> PipelineResult<Self> {
        if !dampener.is_finite() || !(0.0..=1.0).contains(&dampener) {
            return Err(PipelineError::Configuration(format!(
                "demolition_dampener must be within [0, 1], got {}",
                dampener
            )));
        }
        Ok(Self {
            geography,
            sic,
            demographics,
            proposed_split: LandUseSplit::from_records(records, CodeField::Proposed),
            existing_split: LandUseSplit::from_records(records, CodeField::Existing),
            dampener,
        })
    }

    /// Volume entries for one record
    ///
    /// Fails with `GeometryMismatch` when the record intersects no MSOA.
    pub fn disaggregate(&self, record: &PlanningRecord) -> PipelineResult<RecordVolumes> {
        let split = spatial_split(record, self.geography)?;
        let mut entries = Vec::new();
        let mut unmapped = Vec::new();
        let mut averaged = Vec::new();
        let mut skipped = Vec::new();

        let employment = if record.record_type.has_employment() {
            usable(record, Attribute::Gfa, &mut skipped)
        } else {
            None
        };
        let dwellings = if record.record_type.has_residential() {
            usable(record, Attribute::Dwellings, &mut skipped)
        } else {
            None
        };
        let existing = if record.is_greenfield() {
            None
        } else {
            usable(record, Attribute::ExistingGfa, &mut skipped)
        };

        let proposed_codes = self.employment_shares(&record.proposed_land_use, &self.proposed_split);
        let existing_codes = self.employment_shares(&record.existing_land_use, &self.existing_split);

        for msoa in &split.weights {
            if let Some(volume) = employment {
                push_entries(
                    &mut entries,
                    record,
                    &msoa.msoa_id,
                    UseState::Proposed,
                    volume * msoa.weight,
                    &proposed_codes.shares,
                );
            }
            if let Some(volume) = dwellings {
                let residential = self.residential_shares(&msoa.msoa_id);
                push_entries(
                    &mut entries,
                    record,
                    &msoa.msoa_id,
                    UseState::Proposed,
                    volume * msoa.weight,
                    &residential.shares,
                );
                for item in residential.unmapped {
                    if !unmapped.contains(&item) {
                        unmapped.push(item);
                    }
                }
            }
            if let Some(volume) = existing {
                push_entries(
                    &mut entries,
                    record,
                    &msoa.msoa_id,
                    UseState::Existing,
                    volume * self.dampener * msoa.weight,
                    &existing_codes.shares,
                );
            }
        }

        if employment.is_some() {
            unmapped.extend(proposed_codes.unmapped);
            if proposed_codes.averaged {
                averaged.push(CodeField::Proposed);
            }
        }
        if existing.is_some() {
            unmapped.extend(existing_codes.unmapped);
            if existing_codes.averaged {
                averaged.push(CodeField::Existing);
            }
        }

        Ok(RecordVolumes {
            entries,
            split,
            unmapped,
            averaged,
            skipped,
        })
    }

    /// Code → SIC shares for employment floor area
    fn employment_shares(&self, codes: &[LandUseCode], weights: &LandUseSplit) -> CategoryShares {
        let mut shares = Vec::new();
        let mut unmapped = Vec::new();
        let mut code_shares = weights.shares(codes);
        let mut averaged = false;

        if code_shares.is_empty() {
            code_shares = weights.average_shares();
            averaged = !code_shares.is_empty();
        }
        if code_shares.is_empty() {
            unmapped.push(("land_use_code", "no_codes".to_string()));
            shares.push((unclassified_employment(LandUseCode::new(UNCLASSIFIED)), 1.0));
        }

        for (code, code_share) in code_shares {
            match self.sic.sectors(&code) {
                Some(sectors) => {
                    for (sic, sic_share) in sectors {
                        shares.push((
                            Category::Employment {
                                land_use: code.clone(),
                                sic: sic.clone(),
                            },
                            code_share * sic_share,
                        ));
                    }
                }
                None => {
                    unmapped.push(("sic", code.to_string()));
                    shares.push((unclassified_employment(code), code_share));
                }
            }
        }

        CategoryShares {
            shares,
            unmapped,
            averaged,
        }
    }

    /// Dwelling type × traveller type shares for one MSOA
    fn residential_shares(&self, msoa_id: &str) -> CategoryShares {
        let mut unmapped = Vec::new();
        let unclassified = [(UNCLASSIFIED.to_string(), 1.0)];

        let dwelling = match self.demographics.dwelling_types.lookup(msoa_id) {
            ShareLookup::Msoa(shares) | ShareLookup::Aggregate(shares) => shares,
            ShareLookup::Empty => {
                unmapped.push(("dwelling_type", msoa_id.to_string()));
                &unclassified[..]
            }
        };
        let traveller = match self.demographics.traveller_types.lookup(msoa_id) {
            ShareLookup::Msoa(shares) | ShareLookup::Aggregate(shares) => shares,
            ShareLookup::Empty => {
                unmapped.push(("traveller_type", msoa_id.to_string()));
                &unclassified[..]
            }
        };

        let mut shares = Vec::with_capacity(dwelling.len() * traveller.len());
        for (dwelling_type, d_share) in dwelling {
            for (traveller_type, t_share) in traveller {
                shares.push((
                    Category::Residential {
                        dwelling_type: dwelling_type.clone(),
                        traveller_type: traveller_type.clone(),
                    },
                    d_share * t_share,
                ));
            }
        }
        CategoryShares {
            shares,
            unmapped,
            averaged: false,
        }
    }

    /// Disaggregate a batch, recording audit events and statistics
    ///
    /// Per-record errors are audited and the record left out; a fatal error
    /// stops the batch.
    pub fn disaggregate_all(
        &self,
        records: &[PlanningRecord],
        audit: &mut AuditTrail,
    ) -> PipelineResult<(VolumeTable, DisaggregationStats)> {
        info!(
            records = records.len(),
            dampener = self.dampener,
            "Disaggregating build-out volumes"
        );
        let mut table = VolumeTable::default();
        let mut stats = DisaggregationStats::default();

        for record in records {
            if !record.is_valid() {
                stats.excluded_invalid.increment(record.record_type);
                audit.record(AuditEvent::ExcludedInvalid {
                    site_ref: record.site_ref.clone(),
                });
                continue;
            }

            let volumes = match self.disaggregate(record) {
                Ok(volumes) => volumes,
                Err(e) if e.is_fatal() => return Err(e),
                Err(PipelineError::GeometryMismatch { record: site_ref }) => {
                    warn!(site_ref = %site_ref, "Site does not intersect any MSOA, excluded");
                    stats.geometry_mismatches += 1;
                    audit.record(AuditEvent::GeometryMismatch { site_ref });
                    continue;
                }
                Err(e) => {
                    warn!(site_ref = %record.site_ref, error = %e, "Record excluded from disaggregation");
                    continue;
                }
            };
            self.audit_record(record, &volumes, &mut stats, audit);
            stats.records_disaggregated.increment(record.record_type);
            stats.rows += volumes.entries.len();
            table.entries.extend(volumes.entries);
        }

        stats.proposed_volume = table.total(UseState::Proposed);
        stats.existing_volume = table.total(UseState::Existing);
        info!("Disaggregation complete: {}", stats.display_string());
        Ok((table, stats))
    }

    fn audit_record(
        &self,
        record: &PlanningRecord,
        volumes: &RecordVolumes,
        stats: &mut DisaggregationStats,
        audit: &mut AuditTrail,
    ) {
        let site_ref = &record.site_ref;
        if let Some(original_sum) = volumes.split.renormalized_from {
            debug!(site_ref = %site_ref, original_sum, "MSOA weights rescaled");
            audit.record(AuditEvent::WeightsRenormalized {
                site_ref: site_ref.clone(),
                original_sum,
            });
        }
        for &(attribute, value) in &volumes.skipped {
            warn!(site_ref = %site_ref, attribute = %attribute, value, "Unusable value left out of volumes");
            stats.skipped_values += 1;
            audit.record(AuditEvent::SkippedValue {
                site_ref: site_ref.clone(),
                attribute,
                value,
            });
        }
        for &field in &volumes.averaged {
            debug!(site_ref = %site_ref, field = %field, "No codes, average land use split applied");
            stats.averaged_splits += 1;
            audit.record(AuditEvent::AverageLandUseSplit {
                site_ref: site_ref.clone(),
                field,
            });
        }
        for (dimension, key) in &volumes.unmapped {
            let dimension = *dimension;
            warn!(
                site_ref = %site_ref,
                dimension,
                key = %key,
                "No category mapping, volume reported as unclassified"
            );
            stats.unmapped_categories += 1;
            audit.record(AuditEvent::UnmappedCategory {
                site_ref: site_ref.clone(),
                dimension: dimension.to_string(),
                key: key.clone(),
            });
        }
    }
}

/// Value of `attribute` to disaggregate
///
/// Zero and missing values give nothing. Negative and non-finite values give
/// nothing and are noted in `skipped`.
fn usable(
    record: &PlanningRecord,
    attribute: Attribute,
    skipped: &mut Vec<(Attribute, f64)>,
) -> Option<f64> {
    let value = record.attribute(attribute)?;
    if value.is_finite() && value > 0.0 {
        return Some(value);
    }
    if value != 0.0 {
        skipped.push((attribute, value));
    }
    None
}

fn unclassified_employment(land_use: LandUseCode) -> Category {
    Category::Employment {
        land_use,
        sic: UNCLASSIFIED.to_string(),
    }
}

fn push_entries(
    entries: &mut Vec<VolumeEntry>,
    record: &PlanningRecord,
    msoa_id: &str,
    use_state: UseState,
    volume: f64,
    shares: &[(Category, f64)],
) {
    for (category, share) in shares {
        entries.push(VolumeEntry {
            site_ref: record.site_ref.clone(),
            key: DisaggregationKey {
                msoa_id: msoa_id.to_string(),
                category: category.clone(),
                use_state,
            },
            volume: volume * share,
        });
    }
}

// ============================================================================
// Yearly profile
// ============================================================================

/// Spread volume entries over each record's build-out window
///
/// Only years inside `range` are kept. Records without a usable window are
/// reported once each and left out of the profile.
pub fn build_out_profile(
    records: &[PlanningRecord],
    table: &VolumeTable,
    range: &YearRange,
    conversions: &UnitConversions,
    audit: &mut AuditTrail,
) -> Vec<ProfileRow> {
    let mut profiles: BTreeMap<&str, Option<Vec<(i32, f64)>>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_valid()) {
        let profile = record
            .build_out
            .as_ref()
            .and_then(|window| build_out::profile_within(window, range));
        if profile.is_none() && table.for_site(&record.site_ref).next().is_some() {
            audit.record(AuditEvent::MissingBuildOutWindow {
                site_ref: record.site_ref.clone(),
            });
        }
        profiles.insert(record.site_ref.as_str(), profile);
    }

    let mut totals: BTreeMap<(i32, DisaggregationKey), f64> = BTreeMap::new();
    for entry in table.entries() {
        let Some(Some(profile)) = profiles.get(entry.site_ref.as_str()) else {
            continue;
        };
        for (year, weight) in profile {
            *totals.entry((*year, entry.key.clone())).or_insert(0.0) += entry.volume * weight;
        }
    }

    totals
        .into_iter()
        .map(|((year, key), volume)| {
            ProfileRow::new(year, VolumeRow::new(&key, volume, conversions))
        })
        .collect()
}
