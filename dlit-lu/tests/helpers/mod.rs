//! Test Helper Utilities
//!
//! Shared fixtures for the dlit-lu integration tests: a small reference
//! table set, lookup tables, record builders and CSV writers.

#![allow(dead_code)]

use dlit_common::config::InputPaths;
use dlit_lu::disagg::geography::SiteMsoaRow;
use dlit_lu::disagg::{
    DemographicTables, EmploymentDensity, EmploymentDensityRow, LookupGeography, MsoaCountRow,
    Occupancy, ShareTable, SicConversion, SicConversionRow, UnitConversions,
};
use dlit_lu::resolver::ReferenceTables;
use dlit_lu::types::{LandUseCode, PlanningRecord, RecordType};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const EPSILON: f64 = 1e-6;

pub fn code(s: &str) -> LandUseCode {
    LandUseCode::new(s)
}

pub fn codes(list: &[&str]) -> Vec<LandUseCode> {
    list.iter().map(|s| code(s)).collect()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < EPSILON,
        "expected {}, got {}",
        expected,
        actual
    );
}

// ============================================================================
// Reference data
// ============================================================================

/// Valid: E(g), E(g)(i), E(g)(ii), B2, B8, C3
/// Out of date: B1a → E(g), B1 → B1a
/// Known invalid: B11 → B1a
/// Incomplete: E(g)x → {E(g)(i), E(g)(ii)}, F2 → {B8}
pub fn reference_tables() -> ReferenceTables {
    ReferenceTables::from_parts(
        codes(&["E(g)", "E(g)(i)", "E(g)(ii)", "B2", "B8", "C3"]),
        vec![(code("B1a"), code("E(g)")), (code("B1"), code("B1a"))],
        vec![(code("B11"), code("B1a"))],
        vec![
            (code("E(g)x"), code("E(g)(i)")),
            (code("E(g)x"), code("E(g)(ii)")),
            (code("F2"), code("B8")),
        ],
    )
    .unwrap()
}

pub fn geography(rows: &[(&str, &str, f64)]) -> LookupGeography {
    LookupGeography::from_rows(rows.iter().map(|(site, msoa, weight)| SiteMsoaRow {
        site_reference_id: site.to_string(),
        msoa_id: msoa.to_string(),
        weight: *weight,
    }))
}

/// B2 → C; B8 → H; E(g) → J/M evenly. C3 has no sector.
pub fn sic() -> SicConversion {
    SicConversion::from_rows(vec![
        sic_row("B2", "C", 1.0),
        sic_row("B8", "H", 1.0),
        sic_row("E(g)", "J", 0.5),
        sic_row("E(g)", "M", 0.5),
    ])
}

fn sic_row(land_use_code: &str, sic_code: &str, proportion: f64) -> SicConversionRow {
    SicConversionRow {
        land_use_code: land_use_code.to_string(),
        sic_code: sic_code.to_string(),
        proportion,
    }
}

fn count_row(msoa_id: &str, category: &str, count: f64) -> MsoaCountRow {
    MsoaCountRow {
        msoa_id: msoa_id.to_string(),
        category: category.to_string(),
        count,
        pop_per_dwelling: None,
    }
}

/// MSOA "A": 3 houses to 1 flat; travellers split evenly everywhere
pub fn demographics() -> DemographicTables {
    DemographicTables {
        dwelling_types: ShareTable::from_rows(vec![
            count_row("A", "house", 75.0),
            count_row("A", "flat", 25.0),
        ]),
        traveller_types: ShareTable::from_rows(vec![
            count_row("A", "commuter", 50.0),
            count_row("A", "other", 50.0),
        ]),
    }
}

/// B2: 50 sqm per job, E(g): 20 sqm per job; houses hold 2.5 people, flats 1.5
pub fn conversions() -> UnitConversions {
    let density = |code: &str, fte_floorspace: f64| EmploymentDensityRow {
        land_use_code: code.to_string(),
        fte_floorspace,
    };
    let occupied = |category: &str, count: f64, people: f64| MsoaCountRow {
        pop_per_dwelling: Some(people),
        ..count_row("A", category, count)
    };
    UnitConversions {
        density: EmploymentDensity::from_rows(vec![density("B2", 50.0), density("E(g)", 20.0)]),
        occupancy: Occupancy::from_rows(&[occupied("house", 75.0, 2.5), occupied("flat", 25.0, 1.5)]),
    }
}

// ============================================================================
// Records
// ============================================================================

pub fn employment(site: &str, proposed: &[&str], gfa: Option<f64>) -> PlanningRecord {
    let mut record = PlanningRecord::new(site, RecordType::Employment);
    record.proposed_land_use = codes(proposed);
    record.gfa = gfa;
    record.site_area = Some(1.0);
    record
}

pub fn residential(site: &str, dwellings: Option<f64>) -> PlanningRecord {
    let mut record = PlanningRecord::new(site, RecordType::Residential);
    record.proposed_land_use = codes(&["C3"]);
    record.dwellings = dwellings;
    record.site_area = Some(1.0);
    record
}

/// Brownfield employment site replacing `existing_gfa` of B2
pub fn redevelopment(site: &str, gfa: f64, existing_gfa: f64) -> PlanningRecord {
    let mut record = employment(site, &["E(g)"], Some(gfa));
    record.existing_land_use = codes(&["B2"]);
    record.existing_gfa = Some(existing_gfa);
    record
}

// ============================================================================
// CSV fixtures
// ============================================================================

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Write a complete set of input CSVs, returning their paths
///
/// `dlog` is the full D-Log CSV text including its header.
pub fn write_inputs(dir: &TempDir, dlog: &str) -> InputPaths {
    let root = dir.path();
    InputPaths {
        dlog_records: write_file(root, "dlog.csv", dlog),
        valid_codes: write_file(
            root,
            "valid.csv",
            "land_use_code\nE(g)\nE(g)(i)\nE(g)(ii)\nB2\nB8\nC3\nsg\n",
        ),
        out_of_date_codes: write_file(
            root,
            "out_of_date.csv",
            "out_of_date_code,replacement_code\nB1a,E(g)\n",
        ),
        incomplete_codes: write_file(
            root,
            "incomplete.csv",
            "incomplete_code,candidate_code\nE(g)x,E(g)(i)\nE(g)x,E(g)(ii)\n",
        ),
        known_invalid_codes: write_file(
            root,
            "known_invalid.csv",
            "invalid_code,corrected_code\nB11,B1a\n",
        ),
        msoa_weights: write_file(
            root,
            "msoa_weights.csv",
            "site_reference_id,msoa_id,weight\n1,A,0.3\n1,B,0.7\n2,A,1.0\n3,B,1.0\n4,A,1.0\n",
        ),
        luc_sic_conversion: write_file(
            root,
            "luc_sic.csv",
            "land_use_code,sic_code,proportion\nB2,C,1.0\nE(g),J,0.5\nE(g),M,0.5\n",
        ),
        msoa_dwellings: write_file(
            root,
            "dwellings.csv",
            "msoa_id,dwelling_type,units,pop_per_dwelling\nA,house,75,2.5\nA,flat,25,1.5\n",
        ),
        msoa_traveller_types: write_file(
            root,
            "travellers.csv",
            "msoa_id,traveller_type,people\nA,commuter,50\nA,other,50\n",
        ),
        employment_density: Some(write_file(
            root,
            "employment_density.csv",
            "land_use_code,fte_floorspace\nB2,50\nE(g),20\n",
        )),
    }
}

pub const DLOG_HEADER: &str = "site_reference_id,record_type,existing_land_use,proposed_land_use,gfa,existing_gfa,site_area_ha,units,lpa,easting,northing,start_year,end_year,build_out_distribution,tag_certainty";
