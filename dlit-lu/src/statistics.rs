//! Run statistics
//!
//! **Purpose:** Per-stage counts for the run summary, broken down by record type
//!
//! Stages are single-threaded and own their stats struct for the duration of
//! the stage, so no locking is involved.

use crate::types::RecordType;
use serde::{Deserialize, Serialize};

/// Counts split by D-Log sheet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub residential: usize,
    pub employment: usize,
    pub mixed: usize,
}

impl TypeCounts {
    pub fn increment(&mut self, record_type: RecordType) {
        match record_type {
            RecordType::Residential => self.residential += 1,
            RecordType::Employment => self.employment += 1,
            RecordType::Mixed => self.mixed += 1,
        }
    }

    pub fn get(&self, record_type: RecordType) -> usize {
        match record_type {
            RecordType::Residential => self.residential,
            RecordType::Employment => self.employment,
            RecordType::Mixed => self.mixed,
        }
    }

    pub fn total(&self) -> usize {
        self.residential + self.employment + self.mixed
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} residential, {} employment, {} mixed",
            self.residential, self.employment, self.mixed
        )
    }
}

/// **VALIDATION Stage Statistics**
///
/// Display: "N records validated (V valid, I invalid), C corrected, F inferred, M manually resolved, U unresolved"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationStats {
    /// Records passed through the validator
    pub records: TypeCounts,
    /// Records with every code resolved
    pub valid: TypeCounts,
    /// Records with at least one unresolved code
    pub invalid: TypeCounts,
    /// Code fields replaced from OutOfDate/KnownInvalid tables
    pub corrected: usize,
    /// Code fields replaced from a single Incomplete candidate
    pub inferred: usize,
    /// Code fields answered by the manual worksheet
    pub manually_resolved: usize,
    /// Code fields left unchanged
    pub unresolved: usize,
}

impl ValidationStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} records validated ({} valid, {} invalid), {} corrected, {} inferred, {} manually resolved, {} unresolved",
            self.records.total(),
            self.valid.total(),
            self.invalid.total(),
            self.corrected,
            self.inferred,
            self.manually_resolved,
            self.unresolved
        )
    }
}

/// **INFILL Stage Statistics**
///
/// Display: "M models fitted, N values imputed across R records, C clamped, F fallbacks, W build-out windows"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfillStats {
    /// (attribute, stratum) models fitted
    pub models_fitted: usize,
    /// Individual attribute values imputed
    pub values_imputed: usize,
    /// Records receiving at least one imputed value
    pub records_infilled: TypeCounts,
    /// Negative predictions replaced by zero
    pub clamped: usize,
    /// Imputations that used a fallback instead of the configured estimator
    pub fallbacks: usize,
    /// Build-out windows filled from TAG certainty modes
    pub windows_imputed: usize,
}

impl InfillStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} models fitted, {} values imputed across {} records, {} clamped, {} fallbacks, {} build-out windows",
            self.models_fitted,
            self.values_imputed,
            self.records_infilled.total(),
            self.clamped,
            self.fallbacks,
            self.windows_imputed
        )
    }
}

/// **DISAGGREGATION Stage Statistics**
///
/// Display: "N records disaggregated into R rows, X excluded (invalid), G geometry mismatches, A averaged splits, S skipped values"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisaggregationStats {
    /// Records expanded into volume rows
    pub records_disaggregated: TypeCounts,
    /// Invalid records omitted
    pub excluded_invalid: TypeCounts,
    /// Records whose footprint intersects no MSOA
    pub geometry_mismatches: usize,
    /// Shares routed to the unclassified category
    pub unmapped_categories: usize,
    /// Code fields spread by the average land-use split
    pub averaged_splits: usize,
    /// Negative or non-finite values left out
    pub skipped_values: usize,
    /// Volume rows produced
    pub rows: usize,
    /// Sum of proposed-state volume
    pub proposed_volume: f64,
    /// Sum of existing-state volume after dampening
    pub existing_volume: f64,
    /// Jobs in the proposed state, where a density is known
    pub proposed_jobs: f64,
    /// Residents in the proposed state, where an occupancy is known
    pub proposed_population: f64,
}

impl DisaggregationStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} records disaggregated into {} rows, {} excluded (invalid), {} geometry mismatches, {} averaged splits, {} skipped values",
            self.records_disaggregated.total(),
            self.rows,
            self.excluded_invalid.total(),
            self.geometry_mismatches,
            self.averaged_splits,
            self.skipped_values
        )
    }
}

/// Statistics for a whole pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    pub validation: ValidationStats,
    pub infill: InfillStats,
    pub disaggregation: DisaggregationStats,
}

impl RunStatistics {
    pub fn display_lines(&self) -> Vec<String> {
        vec![
            format!("Validation: {}", self.validation.display_string()),
            format!("  by type: {}", self.validation.records.display_string()),
            format!("Infill: {}", self.infill.display_string()),
            format!("Disaggregation: {}", self.disaggregation.display_string()),
            format!(
                "  volume: {:.2} proposed, {:.2} existing",
                self.disaggregation.proposed_volume, self.disaggregation.existing_volume
            ),
            format!(
                "  converted: {:.1} jobs, {:.1} residents",
                self.disaggregation.proposed_jobs, self.disaggregation.proposed_population
            ),
        ]
    }
}
