//! End-to-end pipeline tests
//!
//! Runs validation, infill and disaggregation together over in-memory
//! fixtures and checks the combined behaviour seen by the report writers.

mod helpers;

use dlit_common::config::YearRange;
use dlit_common::InfillMethod;
use dlit_lu::disagg::{
    DemographicTables, LookupGeography, SicConversion, UnitConversions, UseState, VolumeEntry,
    UNCLASSIFIED,
};
use dlit_lu::resolver::{CodeResolver, ReferenceTables};
use dlit_lu::types::{
    Attribute, BuildOutDistribution, BuildOutWindow, CodeField, PartialBuildOut, RecordStatus,
    TagCertainty,
};
use dlit_lu::validators::{NoManualResolution, RecordValidator, VerdictKind};
use dlit_lu::{Pipeline, PipelineConfig, PipelineError, PipelineInputs, PipelineOutput, PlanningRecord};
use helpers::*;
use proptest::prelude::*;
use std::collections::HashMap;

struct Fixture {
    tables: ReferenceTables,
    geography: LookupGeography,
    sic: SicConversion,
    demographics: DemographicTables,
    conversions: UnitConversions,
}

impl Fixture {
    fn new(geography_rows: &[(&str, &str, f64)]) -> Self {
        Self {
            tables: reference_tables(),
            geography: geography(geography_rows),
            sic: sic(),
            demographics: demographics(),
            conversions: conversions(),
        }
    }

    fn pipeline(&self, config: PipelineConfig) -> Pipeline<'_> {
        Pipeline::new(
            config,
            PipelineInputs {
                tables: &self.tables,
                geography: &self.geography,
                sic: &self.sic,
                demographics: &self.demographics,
                conversions: &self.conversions,
            },
        )
        .unwrap()
    }

    fn run(&self, config: PipelineConfig, records: Vec<PlanningRecord>) -> PipelineOutput {
        self.pipeline(config)
            .run(records, &mut NoManualResolution)
            .unwrap()
    }
}

fn site_total(entries: &[&VolumeEntry], use_state: UseState) -> f64 {
    entries
        .iter()
        .filter(|e| e.key.use_state == use_state)
        .map(|e| e.volume)
        .sum()
}

fn msoa_total(output: &PipelineOutput, msoa_id: &str) -> f64 {
    output
        .volumes
        .entries()
        .iter()
        .filter(|e| e.key.msoa_id == msoa_id)
        .map(|e| e.volume)
        .sum()
}

// ============================================================================
// Validation through the pipeline
// ============================================================================

#[test]
fn test_out_of_date_code_corrected_and_split_across_msoas() {
    let fixture = Fixture::new(&[("1", "A", 0.3), ("1", "B", 0.7)]);
    let records = vec![employment("1", &["B1a"], Some(1000.0))];

    let output = fixture.run(PipelineConfig::default(), records);

    let record = &output.records[0];
    assert_eq!(record.proposed_land_use, codes(&["E(g)"]));
    assert_eq!(record.status, RecordStatus::Valid);
    assert_eq!(record.verdicts[0].kind, VerdictKind::Corrected);
    assert_eq!(output.audit.count("corrected"), 1);

    // E(g) splits evenly over J and M after the 0.3 / 0.7 spatial split
    assert_close(msoa_total(&output, "A"), 300.0);
    assert_close(msoa_total(&output, "B"), 700.0);
    assert_eq!(output.volumes.len(), 4);
    for entry in output.volumes.for_site("1") {
        let expected = if entry.key.msoa_id == "A" { 150.0 } else { 350.0 };
        assert_close(entry.volume, expected);
    }
}

#[test]
fn test_chained_correction_is_idempotent() {
    let tables = reference_tables();
    let validator = RecordValidator::new(CodeResolver::new(&tables), false);

    // B11 is a known typo for B1a, which is itself out of date
    let mut record = employment("1", &["B11", "B1"], Some(100.0));
    validator.validate(&mut record, &mut NoManualResolution);
    assert_eq!(record.proposed_land_use, codes(&["E(g)", "E(g)"]));
    assert!(record.verdicts.iter().all(|v| v.kind == VerdictKind::Corrected));

    let once = record.clone();
    let verdicts = validator.validate(&mut record, &mut NoManualResolution);
    assert_eq!(record.proposed_land_use, once.proposed_land_use);
    assert!(verdicts.iter().all(|v| v.kind == VerdictKind::Valid));
}

#[test]
fn test_single_candidate_incomplete_code_is_inferred() {
    let fixture = Fixture::new(&[("1", "A", 1.0)]);
    let records = vec![employment("1", &["F2"], Some(80.0))];

    let output = fixture.run(PipelineConfig::default(), records);

    assert_eq!(output.records[0].proposed_land_use, codes(&["B8"]));
    assert_eq!(output.records[0].verdicts[0].kind, VerdictKind::Inferred);
    assert_eq!(output.audit.count("inferred"), 1);
    assert_close(output.volumes.total(UseState::Proposed), 80.0);
}

#[test]
fn test_ambiguous_code_invalidates_record_but_keeps_it() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0)]);
    let records = vec![
        employment("1", &["E(g)x"], Some(100.0)),
        employment("2", &["B2"], Some(200.0)),
    ];

    let output = fixture.run(PipelineConfig::default(), records);

    assert_eq!(output.records.len(), 2);
    let ambiguous = &output.records[0];
    assert_eq!(ambiguous.status, RecordStatus::Invalid);
    assert_eq!(ambiguous.proposed_land_use, codes(&["E(g)x"]));
    assert_eq!(ambiguous.verdicts[0].kind, VerdictKind::Unresolved);
    assert_eq!(ambiguous.verdicts[0].candidates, codes(&["E(g)(i)", "E(g)(ii)"]));

    assert_eq!(output.volumes.for_site("1").count(), 0);
    assert_close(output.volumes.total(UseState::Proposed), 200.0);
    assert_eq!(output.audit.count("unresolved"), 1);
    assert_eq!(output.audit.count("excluded_invalid"), 1);
    assert_eq!(output.statistics.disaggregation.excluded_invalid.total(), 1);
}

#[test]
fn test_manual_choice_resolves_ambiguous_code() {
    let fixture = Fixture::new(&[("1", "A", 1.0)]);
    let config = PipelineConfig {
        user_infill: true,
        ..PipelineConfig::default()
    };
    let mut answers = HashMap::new();
    answers.insert(
        ("1".to_string(), CodeField::Proposed, "e(g)x".to_string()),
        code("E(g)(i)"),
    );

    let output = fixture
        .pipeline(config)
        .run(vec![employment("1", &["E(g)x"], Some(100.0))], &mut answers)
        .unwrap();

    let record = &output.records[0];
    assert_eq!(record.status, RecordStatus::Valid);
    assert_eq!(record.proposed_land_use, codes(&["E(g)(i)"]));
    assert_eq!(record.verdicts[0].kind, VerdictKind::ManuallyResolved);
    assert_eq!(output.audit.count("manually_resolved"), 1);

    // No SIC mapping for E(g)(i): volume kept under unclassified
    assert_close(output.volumes.total(UseState::Proposed), 100.0);
    assert!(output
        .volume_rows
        .iter()
        .all(|row| row.sic_code == UNCLASSIFIED));
    assert_eq!(output.audit.count("unmapped_category"), 1);
}

// ============================================================================
// Infill through the pipeline
// ============================================================================

#[test]
fn test_missing_gfa_takes_stratum_mean() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0), ("3", "A", 1.0)]);
    let records = vec![
        employment("1", &["B2"], Some(400.0)),
        employment("2", &["B2"], Some(600.0)),
        employment("3", &["B2"], None),
    ];

    let output = fixture.run(PipelineConfig::default(), records);

    let infilled = &output.records[2];
    assert_eq!(infilled.gfa, Some(500.0));
    assert!(infilled.is_imputed(Attribute::Gfa));
    let provenance = &infilled.provenance[0];
    assert_eq!(provenance.method, "mean");
    assert_eq!(provenance.stratum, "employment");
    assert!(provenance.original_missing);

    // Observed values untouched
    assert_eq!(output.records[0].gfa, Some(400.0));
    assert!(output.records[0].provenance.is_empty());

    let site_three: Vec<_> = output.volumes.for_site("3").collect();
    assert_close(site_total(&site_three, UseState::Proposed), 500.0);
    assert_eq!(output.statistics.infill.values_imputed, 1);
    assert_eq!(output.audit.count("imputed"), 1);
}

#[test]
fn test_clamped_regression_never_negative() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0), ("3", "A", 1.0), ("4", "A", 1.0)]);
    // gfa = 1200 - 300 * site_area, so a 10 ha site predicts -1800
    let mut records: Vec<PlanningRecord> = [(1.0, 900.0), (2.0, 600.0), (3.0, 300.0)]
        .iter()
        .enumerate()
        .map(|(i, (area, gfa))| {
            let mut record = employment(&(i + 1).to_string(), &["B2"], Some(*gfa));
            record.site_area = Some(*area);
            record
        })
        .collect();
    let mut large = employment("4", &["B2"], None);
    large.site_area = Some(10.0);
    records.push(large);

    let config = PipelineConfig {
        gfa_infill_method: InfillMethod::RegressionNoNegatives,
        ..PipelineConfig::default()
    };
    let output = fixture.run(config, records);

    let clamped = &output.records[3];
    assert_eq!(clamped.gfa, Some(0.0));
    assert!(clamped.provenance[0].clamped);
    assert_eq!(clamped.provenance[0].method, "regression_no_negatives");
    assert_eq!(output.audit.count("clamped"), 1);
    assert_eq!(output.statistics.infill.clamped, 1);
    assert_eq!(output.volumes.for_site("4").count(), 0);
}

#[test]
fn test_insufficient_training_data_is_fatal() {
    let fixture = Fixture::new(&[("1", "A", 1.0)]);
    let records = vec![employment("1", &["B2"], None)];

    let result = fixture
        .pipeline(PipelineConfig::default())
        .run(records, &mut NoManualResolution);

    assert!(matches!(
        result,
        Err(PipelineError::InsufficientTrainingData { attribute: Attribute::Gfa, .. })
    ));
}

// ============================================================================
// Disaggregation through the pipeline
// ============================================================================

#[test]
fn test_dampener_zero_removes_existing_volume() {
    let fixture = Fixture::new(&[("1", "A", 1.0)]);
    let config = PipelineConfig {
        demolition_dampener: 0.0,
        ..PipelineConfig::default()
    };

    let output = fixture.run(config, vec![redevelopment("1", 2000.0, 1000.0)]);

    assert_close(output.volumes.total(UseState::Existing), 0.0);
    assert_close(output.volumes.total(UseState::Proposed), 2000.0);
}

#[test]
fn test_full_dampener_keeps_existing_volume() {
    let fixture = Fixture::new(&[("1", "A", 0.4), ("1", "B", 0.6)]);

    let output = fixture.run(PipelineConfig::default(), vec![redevelopment("1", 2000.0, 1000.0)]);

    let entries: Vec<_> = output.volumes.for_site("1").collect();
    assert_close(site_total(&entries, UseState::Existing), 1000.0);
    assert_close(site_total(&entries, UseState::Proposed), 2000.0);
    assert!(entries
        .iter()
        .filter(|e| e.key.use_state == UseState::Existing)
        .all(|e| matches!(&e.key.category, dlit_lu::disagg::Category::Employment { sic, .. } if sic == "C")));
}

#[test]
fn test_geometry_mismatch_excludes_record() {
    let fixture = Fixture::new(&[("1", "A", 1.0)]);
    let records = vec![
        employment("1", &["B2"], Some(100.0)),
        employment("9", &["B2"], Some(100.0)),
    ];

    let output = fixture.run(PipelineConfig::default(), records);

    assert_eq!(output.records[1].status, RecordStatus::Valid);
    assert_eq!(output.volumes.for_site("9").count(), 0);
    assert_eq!(output.audit.count("geometry_mismatch"), 1);
    assert_eq!(output.statistics.disaggregation.geometry_mismatches, 1);
    assert_close(output.volumes.total(UseState::Proposed), 100.0);
}

#[test]
fn test_residential_split_by_dwelling_and_traveller_type() {
    let fixture = Fixture::new(&[("4", "A", 1.0)]);

    let output = fixture.run(PipelineConfig::default(), vec![residential("4", Some(100.0))]);

    let rows = &output.volume_rows;
    assert_eq!(rows.len(), 4);
    for row in rows {
        assert_eq!(row.sector, "residential");
        assert_eq!(row.unit, "dwellings");
        assert!(row.jobs.is_none());
        let (expected, residents) = if row.dwelling_type == "house" {
            (37.5, 93.75)
        } else {
            (12.5, 18.75)
        };
        assert_close(row.volume, expected);
        assert_close(row.population.unwrap(), residents);
    }
    assert_close(output.statistics.disaggregation.proposed_population, 225.0);
    assert_close(output.volumes.total(UseState::Proposed), 100.0);
}

#[test]
fn test_employment_rows_report_jobs_where_density_known() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0)]);
    let records = vec![
        employment("1", &["B2"], Some(1000.0)),
        employment("2", &["B8"], Some(400.0)),
    ];

    let output = fixture.run(PipelineConfig::default(), records);

    let b2 = output
        .volume_rows
        .iter()
        .find(|r| r.land_use_code == "B2")
        .unwrap();
    assert_close(b2.jobs.unwrap(), 20.0);
    let b8 = output
        .volume_rows
        .iter()
        .find(|r| r.land_use_code == "B8")
        .unwrap();
    assert!(b8.jobs.is_none());
    assert_close(output.statistics.disaggregation.proposed_jobs, 20.0);
    assert_close(output.volumes.total(UseState::Proposed), 1400.0);
}

#[test]
fn test_build_out_profile_restricted_to_years() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0)]);
    let mut phased = employment("1", &["B2"], Some(1000.0));
    phased.build_out = Some(BuildOutWindow {
        start_year: 2024,
        end_year: 2027,
        distribution: BuildOutDistribution::Flat,
    });
    let unphased = employment("2", &["B2"], Some(500.0));

    let config = PipelineConfig {
        build_out_years: Some(YearRange {
            start: 2025,
            end: 2026,
        }),
        ..PipelineConfig::default()
    };
    let output = fixture.run(config, vec![phased, unphased]);

    let profile = output.profile.as_ref().unwrap();
    assert_eq!(profile.len(), 2);
    assert_eq!(profile[0].year, 2025);
    assert_eq!(profile[1].year, 2026);
    for row in profile {
        assert_close(row.volume, 250.0);
    }
    assert_eq!(output.audit.count("missing_build_out_window"), 1);
}

#[test]
fn test_missing_years_take_modal_window_of_certainty() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0), ("3", "A", 1.0)]);
    let mut observed = employment("1", &["B2"], Some(300.0));
    observed.tag_certainty = Some(TagCertainty::MoreThanLikely);
    observed.build_out = Some(BuildOutWindow {
        start_year: 2025,
        end_year: 2027,
        distribution: BuildOutDistribution::Flat,
    });
    let mut start_only = employment("2", &["B2"], Some(200.0));
    start_only.tag_certainty = Some(TagCertainty::MoreThanLikely);
    start_only.incomplete_build_out = Some(PartialBuildOut {
        start_year: Some(2026),
        end_year: None,
        distribution: BuildOutDistribution::Flat,
    });
    let mut unknown = employment("3", &["B2"], Some(100.0));
    unknown.tag_certainty = Some(TagCertainty::MoreThanLikely);

    let config = PipelineConfig {
        build_out_years: Some(YearRange {
            start: 2025,
            end: 2030,
        }),
        ..PipelineConfig::default()
    };
    let output = fixture.run(config, vec![observed, start_only, unknown]);

    let window = output.records[1].build_out.unwrap();
    assert_eq!((window.start_year, window.end_year), (2026, 2028));
    assert!(output.records[1].build_out_imputed);
    let window = output.records[2].build_out.unwrap();
    assert_eq!((window.start_year, window.end_year), (2025, 2027));
    assert_eq!(output.audit.count("build_out_infilled"), 2);
    assert_eq!(output.audit.count("missing_build_out_window"), 0);
    assert_eq!(output.statistics.infill.windows_imputed, 2);

    let profiled: f64 = output.profile.as_ref().unwrap().iter().map(|r| r.volume).sum();
    assert_close(profiled, 600.0);
}

#[test]
fn test_record_without_codes_uses_average_split() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0), ("3", "A", 1.0)]);
    let uncoded = employment("3", &[], Some(500.0));
    let records = vec![
        employment("1", &["B2"], Some(300.0)),
        employment("2", &["B8"], Some(100.0)),
        uncoded,
    ];

    let output = fixture.run(PipelineConfig::default(), records);

    let entries: Vec<_> = output.volumes.for_site("3").collect();
    let by_sic = |sic_code: &str| -> f64 {
        entries
            .iter()
            .filter(|e| matches!(&e.key.category, dlit_lu::disagg::Category::Employment { sic, .. } if sic == sic_code))
            .map(|e| e.volume)
            .sum()
    };
    assert_close(by_sic("C"), 375.0);
    assert_close(by_sic("H"), 125.0);
    assert_close(by_sic(UNCLASSIFIED), 0.0);
    assert_eq!(output.audit.count("average_land_use_split"), 1);
    assert_eq!(output.statistics.disaggregation.averaged_splits, 1);
}

#[test]
fn test_negative_floor_space_is_audited_not_disaggregated() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("2", "A", 1.0)]);
    let records = vec![
        employment("1", &["B2"], Some(100.0)),
        employment("2", &["B2"], Some(-50.0)),
    ];

    let output = fixture.run(PipelineConfig::default(), records);

    assert_eq!(output.volumes.for_site("2").count(), 0);
    assert_eq!(output.audit.count("skipped_value"), 1);
    assert_eq!(output.statistics.disaggregation.skipped_values, 1);
    assert_close(output.volumes.total(UseState::Proposed), 100.0);
}

#[test]
fn test_profile_absent_without_years() {
    let fixture = Fixture::new(&[("1", "A", 1.0)]);
    let output = fixture.run(PipelineConfig::default(), vec![employment("1", &["B2"], Some(1.0))]);
    assert!(output.profile.is_none());
}

#[test]
fn test_statistics_by_record_type() {
    let fixture = Fixture::new(&[("1", "A", 1.0), ("4", "A", 1.0)]);
    let records = vec![
        employment("1", &["B2"], Some(100.0)),
        residential("4", Some(10.0)),
        employment("5", &["E(g)x"], Some(100.0)),
    ];

    let output = fixture.run(PipelineConfig::default(), records);

    let stats = &output.statistics;
    assert_eq!(stats.validation.records.total(), 3);
    assert_eq!(stats.validation.invalid.total(), 1);
    assert_eq!(stats.disaggregation.records_disaggregated.total(), 2);
    assert_eq!(stats.display_lines().len(), 6);
}

proptest! {
    #[test]
    fn prop_pipeline_conserves_volume(
        gfa in 1.0f64..1e6,
        existing in 1.0f64..1e6,
        dampener in 0.0f64..=1.0,
        weight in 0.01f64..0.99,
    ) {
        let fixture = Fixture::new(&[("1", "A", weight), ("1", "B", 1.0 - weight)]);
        let config = PipelineConfig {
            demolition_dampener: dampener,
            ..PipelineConfig::default()
        };
        let output = fixture.run(config, vec![redevelopment("1", gfa, existing)]);

        let proposed = output.volumes.total(UseState::Proposed);
        let existing_total = output.volumes.total(UseState::Existing);
        prop_assert!((proposed - gfa).abs() <= 1e-6 * gfa.max(1.0));
        prop_assert!((existing_total - existing * dampener).abs() <= 1e-6 * existing.max(1.0));
    }
}
