//! CSV input loading
//!
//! Reads the D-Log and the lookup tables named in `InputPaths`. All tables are
//! loaded fully into memory before any processing starts.
//!
//! # D-Log columns
//! `site_reference_id, record_type, existing_land_use, proposed_land_use,
//! gfa, existing_gfa, site_area_ha, units, lpa, easting, northing,
//! start_year, end_year, build_out_distribution, tag_certainty`
//!
//! Code lists are separated by `,` or `;`. Numeric cells that are empty,
//! `-`, or zero are treated as missing, matching how the register marks
//! unknown figures. Negative quantities are treated as missing too, so they
//! get infilled rather than disaggregated. A build-out window that ends
//! before it starts, or spans more than `MAX_BUILD_OUT_YEARS`, is dropped.
//! A window with only one year is kept as a `PartialBuildOut` for the years
//! infill.

use crate::disagg::geography::SiteMsoaRow;
use crate::disagg::{
    DemographicTables, EmploymentDensity, EmploymentDensityRow, LookupGeography, MsoaCountRow,
    Occupancy, ShareTable, SicConversion, SicConversionRow, UnitConversions,
};
use crate::error::{PipelineError, PipelineResult};
use crate::resolver::ReferenceTables;
use crate::types::{
    BuildOutDistribution, BuildOutWindow, GridPoint, LandUseCode, PartialBuildOut,
    PlanningRecord, RecordType, TagCertainty,
};
use dlit_common::config::InputPaths;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Cell values meaning "no data"
const MISSING_MARKERS: [&str; 2] = ["", "-"];

/// Separators accepted between codes in one cell
const CODE_SEPARATORS: [char; 2] = [',', ';'];

/// Longest build-out window accepted from the register, in years
pub const MAX_BUILD_OUT_YEARS: i64 = 200;

/// Everything the pipeline needs, loaded from disk
#[derive(Debug)]
pub struct InputData {
    pub records: Vec<PlanningRecord>,
    pub tables: ReferenceTables,
    pub geography: LookupGeography,
    pub sic: SicConversion,
    pub demographics: DemographicTables,
    pub conversions: UnitConversions,
}

/// Load every input named in `paths`
pub fn load_inputs(paths: &InputPaths) -> PipelineResult<InputData> {
    let tables = load_reference_tables(paths)?;
    let records = load_records(&paths.dlog_records)?;

    let geography = LookupGeography::from_rows(read_csv::<SiteMsoaRow>(&paths.msoa_weights)?);
    let sic = SicConversion::from_rows(read_csv::<SicConversionRow>(&paths.luc_sic_conversion)?);
    let dwelling_rows = read_csv::<MsoaCountRow>(&paths.msoa_dwellings)?;
    let occupancy = Occupancy::from_rows(&dwelling_rows);
    let density = match &paths.employment_density {
        Some(path) => EmploymentDensity::from_rows(read_csv::<EmploymentDensityRow>(path)?),
        None => EmploymentDensity::default(),
    };
    let demographics = DemographicTables {
        dwelling_types: ShareTable::from_rows(dwelling_rows),
        traveller_types: ShareTable::from_rows(read_csv::<MsoaCountRow>(
            &paths.msoa_traveller_types,
        )?),
    };

    if sic.is_empty() {
        warn!("Land use to SIC conversion table is empty, employment volumes will be unclassified");
    }
    if density.is_empty() {
        info!("No employment densities, jobs will not be reported");
    }
    if occupancy.is_empty() {
        info!("No persons per dwelling, population will not be reported");
    }

    info!(
        records = records.len(),
        sites_with_msoa_weights = geography.site_count(),
        sic_codes = sic.len(),
        densities = density.len(),
        "Inputs loaded"
    );

    Ok(InputData {
        records,
        tables,
        geography,
        sic,
        demographics,
        conversions: UnitConversions { density, occupancy },
    })
}

// ============================================================================
// Generic CSV reading
// ============================================================================

/// Deserialize every row of a CSV file
///
/// A missing file is a configuration error; a malformed row is an
/// `InvalidInput` error naming the file and 1-based data row.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> PipelineResult<Vec<T>> {
    if !path.exists() {
        return Err(PipelineError::Configuration(format!(
            "input file not found: {}",
            path.display()
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (index, row) in reader.deserialize::<T>().enumerate() {
        let row = row.map_err(|e| PipelineError::InvalidInput {
            source_name: path.display().to_string(),
            message: format!("row {}: {}", index + 1, e),
        })?;
        rows.push(row);
    }
    debug!(path = %path.display(), rows = rows.len(), "Read CSV");
    Ok(rows)
}

// ============================================================================
// Reference tables
// ============================================================================

#[derive(Debug, Deserialize)]
struct ValidCodeRow {
    land_use_code: String,
}

#[derive(Debug, Deserialize)]
struct OutOfDateRow {
    out_of_date_code: String,
    replacement_code: String,
}

#[derive(Debug, Deserialize)]
struct KnownInvalidRow {
    invalid_code: String,
    corrected_code: String,
}

#[derive(Debug, Deserialize)]
struct IncompleteRow {
    incomplete_code: String,
    candidate_code: String,
}

/// Load the four code tables and register format aliases
pub fn load_reference_tables(paths: &InputPaths) -> PipelineResult<ReferenceTables> {
    let valid = read_csv::<ValidCodeRow>(&paths.valid_codes)?
        .into_iter()
        .map(|r| LandUseCode::new(r.land_use_code));
    let out_of_date = read_csv::<OutOfDateRow>(&paths.out_of_date_codes)?
        .into_iter()
        .map(|r| (LandUseCode::new(r.out_of_date_code), LandUseCode::new(r.replacement_code)));
    let known_invalid = read_csv::<KnownInvalidRow>(&paths.known_invalid_codes)?
        .into_iter()
        .map(|r| (LandUseCode::new(r.invalid_code), LandUseCode::new(r.corrected_code)));
    let incomplete = read_csv::<IncompleteRow>(&paths.incomplete_codes)?
        .into_iter()
        .map(|r| (LandUseCode::new(r.incomplete_code), LandUseCode::new(r.candidate_code)));

    let tables = ReferenceTables::from_parts(valid, out_of_date, known_invalid, incomplete)?
        .with_format_aliases();
    info!(valid_codes = tables.valid_codes().len(), "Reference tables loaded");
    Ok(tables)
}

// ============================================================================
// D-Log records
// ============================================================================

/// Raw D-Log row, every cell as text
#[derive(Debug, Deserialize)]
struct RawRecord {
    site_reference_id: String,
    record_type: String,
    #[serde(default)]
    existing_land_use: String,
    #[serde(default)]
    proposed_land_use: String,
    #[serde(default)]
    gfa: String,
    #[serde(default)]
    existing_gfa: String,
    #[serde(default)]
    site_area_ha: String,
    #[serde(default)]
    units: String,
    #[serde(default)]
    lpa: String,
    #[serde(default)]
    easting: String,
    #[serde(default)]
    northing: String,
    #[serde(default)]
    start_year: String,
    #[serde(default)]
    end_year: String,
    #[serde(default)]
    build_out_distribution: String,
    #[serde(default)]
    tag_certainty: String,
}

/// Load the D-Log
pub fn load_records(path: &Path) -> PipelineResult<Vec<PlanningRecord>> {
    let source_name = path.display().to_string();
    let records = read_csv::<RawRecord>(path)?
        .into_iter()
        .enumerate()
        .map(|(index, raw)| parse_record(raw, index + 1, &source_name))
        .collect::<PipelineResult<Vec<_>>>()?;
    info!(path = %path.display(), records = records.len(), "D-Log loaded");
    Ok(records)
}

fn parse_record(raw: RawRecord, row: usize, source_name: &str) -> PipelineResult<PlanningRecord> {
    let invalid = |message: String| PipelineError::InvalidInput {
        source_name: source_name.to_string(),
        message: format!("row {}: {}", row, message),
    };

    let site_ref = raw.site_reference_id.trim().to_string();
    if site_ref.is_empty() {
        return Err(invalid("missing site_reference_id".to_string()));
    }
    let record_type = RecordType::parse(&raw.record_type)
        .ok_or_else(|| invalid(format!("unknown record_type '{}'", raw.record_type)))?;

    let mut record = PlanningRecord::new(site_ref, record_type);
    record.existing_land_use = parse_codes(&raw.existing_land_use);
    record.proposed_land_use = parse_codes(&raw.proposed_land_use);
    record.gfa = parse_measure(&raw.gfa, "gfa", &record.site_ref);
    record.existing_gfa = parse_measure(&raw.existing_gfa, "existing_gfa", &record.site_ref);
    record.site_area = parse_measure(&raw.site_area_ha, "site_area_ha", &record.site_ref);
    record.dwellings = parse_measure(&raw.units, "units", &record.site_ref);
    record.lpa = Some(raw.lpa.trim().to_string()).filter(|s| !s.is_empty());

    let easting = parse_number(&raw.easting, "easting", &record.site_ref);
    let northing = parse_number(&raw.northing, "northing", &record.site_ref);
    if let (Some(easting), Some(northing)) = (easting, northing) {
        record.location = Some(GridPoint { easting, northing });
    }

    record.tag_certainty = TagCertainty::parse(&raw.tag_certainty);
    let (window, partial) = parse_years(&raw, &record.site_ref);
    record.build_out = window;
    record.incomplete_build_out = partial;
    Ok(record)
}

/// Split a cell into codes, dropping blanks and missing markers
pub fn parse_codes(cell: &str) -> Vec<LandUseCode> {
    cell.split(&CODE_SEPARATORS[..])
        .map(str::trim)
        .filter(|code| !MISSING_MARKERS.contains(code))
        .map(LandUseCode::new)
        .collect()
}

/// Parse a quantity cell; missing markers, zero, negatives and garbage become `None`
pub fn parse_measure(cell: &str, column: &str, site_ref: &str) -> Option<f64> {
    let value = parse_number(cell, column, site_ref)?;
    if value < 0.0 {
        warn!(site_ref = %site_ref, column, value, "Negative quantity treated as missing");
        return None;
    }
    Some(value)
}

/// Parse a signed numeric cell such as a grid coordinate
fn parse_number(cell: &str, column: &str, site_ref: &str) -> Option<f64> {
    let cell = cell.trim();
    if MISSING_MARKERS.contains(&cell) {
        return None;
    }
    match cell.replace(',', "").parse::<f64>() {
        Ok(value) if value.is_finite() && value != 0.0 => Some(value),
        Ok(_) => None,
        Err(_) => {
            warn!(site_ref = %site_ref, column, value = %cell, "Unparseable number treated as missing");
            None
        }
    }
}

/// Split the year columns into a complete window or a partial one
///
/// A complete window that fails the range check is dropped along with both
/// years, leaving the record to the modal window of its certainty.
fn parse_years(raw: &RawRecord, site_ref: &str) -> (Option<BuildOutWindow>, Option<PartialBuildOut>) {
    let start_year = parse_year(&raw.start_year, "start_year", site_ref);
    let end_year = parse_year(&raw.end_year, "end_year", site_ref);
    let distribution = parse_distribution(&raw.build_out_distribution, site_ref);

    match (start_year, end_year) {
        (Some(start_year), Some(end_year)) => {
            let span = i64::from(end_year) - i64::from(start_year) + 1;
            if !(1..=MAX_BUILD_OUT_YEARS).contains(&span) {
                warn!(
                    site_ref = %site_ref,
                    start_year,
                    end_year,
                    "Build-out window out of range, treated as missing"
                );
                return (None, None);
            }
            let window = BuildOutWindow {
                start_year,
                end_year,
                distribution,
            };
            (Some(window), None)
        }
        (None, None) => (None, None),
        (start_year, end_year) => {
            let partial = PartialBuildOut {
                start_year,
                end_year,
                distribution,
            };
            (None, Some(partial))
        }
    }
}

fn parse_year(cell: &str, column: &str, site_ref: &str) -> Option<i32> {
    let cell = cell.trim();
    if MISSING_MARKERS.contains(&cell) {
        return None;
    }
    match cell.parse::<i32>() {
        Ok(year) => Some(year),
        Err(_) => {
            warn!(site_ref = %site_ref, column, value = %cell, "Unparseable year treated as missing");
            None
        }
    }
}

fn parse_distribution(cell: &str, site_ref: &str) -> BuildOutDistribution {
    match cell.trim() {
        "" => BuildOutDistribution::Flat,
        name => BuildOutDistribution::parse(name).unwrap_or_else(|| {
            warn!(site_ref = %site_ref, distribution = %name, "Unknown build-out distribution, using flat");
            BuildOutDistribution::Flat
        }),
    }
}
