//! Audit trail
//!
//! One `AuditTrail` is created per run and passed by `&mut` through every
//! stage. Each automatic decision that changes or drops data is recorded here
//! so the final report can enumerate it.

use crate::infill::years::WindowSource;
use crate::resolver::ResolutionStatus;
use crate::statistics::RunStatistics;
use crate::types::{Attribute, CodeField, FieldRef, LandUseCode, Provenance, TagCertainty};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// One audited decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Code replaced from the OutOfDate or KnownInvalid table
    Corrected {
        site_ref: String,
        field: FieldRef,
        original: LandUseCode,
        corrected: LandUseCode,
        via: ResolutionStatus,
    },
    /// Code replaced by the only candidate of an incomplete code
    Inferred {
        site_ref: String,
        field: FieldRef,
        original: LandUseCode,
        corrected: LandUseCode,
    },
    /// Code replaced by a user choice from the worksheet
    ManuallyResolved {
        site_ref: String,
        field: FieldRef,
        original: LandUseCode,
        chosen: LandUseCode,
    },
    /// Code left unchanged; record becomes invalid
    Unresolved {
        site_ref: String,
        field: FieldRef,
        original: LandUseCode,
        status: ResolutionStatus,
        candidates: Vec<LandUseCode>,
    },
    /// Missing attribute estimated
    Imputed {
        site_ref: String,
        provenance: Provenance,
    },
    /// Negative prediction replaced by zero
    Clamped {
        site_ref: String,
        attribute: Attribute,
        prediction: f64,
    },
    /// Build-out window filled from the modal window of its TAG certainty
    BuildOutInfilled {
        site_ref: String,
        certainty: TagCertainty,
        source: WindowSource,
        start_year: i32,
        end_year: i32,
    },
    /// Invalid record omitted from disaggregation
    ExcludedInvalid { site_ref: String },
    /// Footprint intersects no MSOA
    GeometryMismatch { site_ref: String },
    /// MSOA weights did not sum to one and were rescaled
    WeightsRenormalized { site_ref: String, original_sum: f64 },
    /// Volume routed to the unclassified category
    UnmappedCategory {
        site_ref: String,
        dimension: String,
        key: String,
    },
    /// Record listed no codes; volume spread by the dataset land-use split
    AverageLandUseSplit { site_ref: String, field: CodeField },
    /// Negative or non-finite value left out of the volumes
    SkippedValue {
        site_ref: String,
        attribute: Attribute,
        value: f64,
    },
    /// Record has no build-out window; omitted from the yearly profile
    MissingBuildOutWindow { site_ref: String },
}

impl AuditEvent {
    pub fn site_ref(&self) -> &str {
        match self {
            Self::Corrected { site_ref, .. }
            | Self::Inferred { site_ref, .. }
            | Self::ManuallyResolved { site_ref, .. }
            | Self::Unresolved { site_ref, .. }
            | Self::Imputed { site_ref, .. }
            | Self::Clamped { site_ref, .. }
            | Self::BuildOutInfilled { site_ref, .. }
            | Self::ExcludedInvalid { site_ref }
            | Self::GeometryMismatch { site_ref }
            | Self::WeightsRenormalized { site_ref, .. }
            | Self::UnmappedCategory { site_ref, .. }
            | Self::AverageLandUseSplit { site_ref, .. }
            | Self::SkippedValue { site_ref, .. }
            | Self::MissingBuildOutWindow { site_ref } => site_ref,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Corrected { .. } => "corrected",
            Self::Inferred { .. } => "inferred",
            Self::ManuallyResolved { .. } => "manually_resolved",
            Self::Unresolved { .. } => "unresolved",
            Self::Imputed { .. } => "imputed",
            Self::Clamped { .. } => "clamped",
            Self::BuildOutInfilled { .. } => "build_out_infilled",
            Self::ExcludedInvalid { .. } => "excluded_invalid",
            Self::GeometryMismatch { .. } => "geometry_mismatch",
            Self::WeightsRenormalized { .. } => "weights_renormalized",
            Self::UnmappedCategory { .. } => "unmapped_category",
            Self::AverageLandUseSplit { .. } => "average_land_use_split",
            Self::SkippedValue { .. } => "skipped_value",
            Self::MissingBuildOutWindow { .. } => "missing_build_out_window",
        }
    }
}

/// Accumulated audit events for one run
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    events: Vec<AuditEvent>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events of one kind (see `AuditEvent::kind`)
    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn for_site<'a>(&'a self, site_ref: &'a str) -> impl Iterator<Item = &'a AuditEvent> {
        self.events.iter().filter(move |e| e.site_ref() == site_ref)
    }

    /// Unresolved codes of one field, for the pending-worksheet output
    pub fn unresolved_in(&self, field: CodeField) -> impl Iterator<Item = &AuditEvent> {
        self.events.iter().filter(move |e| {
            matches!(e, AuditEvent::Unresolved { field: f, .. } if f.field == field)
        })
    }
}

/// Serialisable audit report
#[derive(Debug, Serialize)]
pub struct AuditReport<'a> {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub summary: Vec<String>,
    pub statistics: &'a RunStatistics,
    pub events: &'a [AuditEvent],
}

impl<'a> AuditReport<'a> {
    pub fn new(run_id: Uuid, statistics: &'a RunStatistics, trail: &'a AuditTrail) -> Self {
        Self {
            run_id,
            generated_at: Utc::now(),
            summary: statistics.display_lines(),
            statistics,
            events: trail.events(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON
    pub fn write(&self, path: &Path) -> crate::error::PipelineResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        info!(
            path = %path.display(),
            events = self.events.len(),
            "Audit report written"
        );
        Ok(())
    }
}
