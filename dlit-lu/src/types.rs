//! Core Types for the D-Log pipeline
//!
//! Defines the planning record and the small value types shared by every
//! stage:
//! - **Validation:** `LandUseCode`, `CodeField`, `FieldRef`
//! - **Infill:** `Attribute`, `Provenance`
//! - **Disaggregation:** `GridPoint`, `BuildOutWindow`, `TagCertainty`
//!
//! # Record Lifecycle
//! Records are created by the loader, corrected in place by the validator,
//! gap-filled in place by the infiller and then read (never mutated) by the
//! disaggregator. Records are never removed; invalid ones carry their
//! verdict trail to the audit output.

use crate::validators::FieldVerdict;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Land-use codes
// ============================================================================

/// Land-use classification code as written in the D-Log (e.g. "B2", "E(g)")
///
/// The stored text keeps its original spelling; lookups use `normalized()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandUseCode(String);

impl LandUseCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lookup key: surrounding whitespace removed, lower case
    pub fn normalized(&self) -> String {
        normalize_code(&self.0)
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for LandUseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LandUseCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Normalise raw code text for table lookup
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Which land-use list on a record a code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeField {
    Existing,
    Proposed,
}

impl CodeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Existing => "existing_land_use",
            Self::Proposed => "proposed_land_use",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "existing_land_use" | "existing" => Some(Self::Existing),
            "proposed_land_use" | "proposed" => Some(Self::Proposed),
            _ => None,
        }
    }
}

impl fmt::Display for CodeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of one code within a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub field: CodeField,
    pub index: usize,
}

// ============================================================================
// Record classification
// ============================================================================

/// D-Log sheet a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Residential,
    Employment,
    Mixed,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [Self::Residential, Self::Employment, Self::Mixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Residential => "residential",
            Self::Employment => "employment",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "residential" => Some(Self::Residential),
            "employment" => Some(Self::Employment),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Whether records of this type carry employment floor space
    pub fn has_employment(&self) -> bool {
        matches!(self, Self::Employment | Self::Mixed)
    }

    /// Whether records of this type carry dwellings
    pub fn has_residential(&self) -> bool {
        matches!(self, Self::Residential | Self::Mixed)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a record may flow into disaggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Not yet validated
    #[default]
    Pending,
    /// Every code resolved
    Valid,
    /// At least one code left unresolved
    Invalid,
}

// ============================================================================
// Numeric attributes
// ============================================================================

/// Numeric attribute subject to infilling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// Proposed gross floor area (sqm)
    Gfa,
    /// Floor area of the use being replaced (sqm)
    ExistingGfa,
    /// Site area (hectares)
    SiteArea,
    /// Proposed dwelling units
    Dwellings,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gfa => "gfa",
            Self::ExistingGfa => "existing_gfa",
            Self::SiteArea => "site_area",
            Self::Dwellings => "dwellings",
        }
    }

    /// Whether a record is expected to carry this attribute at all
    pub fn applies_to(&self, record: &PlanningRecord) -> bool {
        match self {
            Self::Gfa => record.record_type.has_employment(),
            Self::Dwellings => record.record_type.has_residential(),
            Self::SiteArea => true,
            Self::ExistingGfa => !record.is_greenfield(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker attached to every imputed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub attribute: Attribute,
    pub method: String,
    pub stratum: String,
    pub original_missing: bool,
    /// Prediction was negative and replaced by zero
    pub clamped: bool,
    /// Why the configured estimator was not used for this record
    pub fallback: Option<String>,
    pub value: f64,
}

// ============================================================================
// Geometry and build-out
// ============================================================================

/// Site location on the national grid
///
/// A record with a point is assigned to exactly one MSOA. Without one the
/// site boundary is known only to the `GeographyProvider`, which splits it
/// across MSOAs by intersecting area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub easting: f64,
    pub northing: f64,
}

/// Shape of the build-out profile between start and end year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutDistribution {
    Flat,
    Early,
    Late,
    Mid,
}

impl BuildOutDistribution {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "flat" => Some(Self::Flat),
            "early" => Some(Self::Early),
            "late" => Some(Self::Late),
            "mid" => Some(Self::Mid),
            _ => None,
        }
    }
}

/// Years over which a site is built out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutWindow {
    pub start_year: i32,
    pub end_year: i32,
    pub distribution: BuildOutDistribution,
}

/// Build-out years as written when only one end (or neither) is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialBuildOut {
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub distribution: BuildOutDistribution,
}

/// TAG uncertainty-log category of a development
///
/// Ids follow the D-Log's numbering; 0 ("not specified") has no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCertainty {
    NearCertain,
    MoreThanLikely,
    ReasonablyForeseeable,
    Hypothetical,
}

impl TagCertainty {
    pub const ALL: [TagCertainty; 4] = [
        Self::NearCertain,
        Self::MoreThanLikely,
        Self::ReasonablyForeseeable,
        Self::Hypothetical,
    ];

    pub fn id(&self) -> u8 {
        match self {
            Self::NearCertain => 1,
            Self::MoreThanLikely => 2,
            Self::ReasonablyForeseeable => 3,
            Self::Hypothetical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NearCertain => "near certain",
            Self::MoreThanLikely => "more than likely",
            Self::ReasonablyForeseeable => "reasonably foreseeable",
            Self::Hypothetical => "hypothetical",
        }
    }

    /// Accepts the numeric id or the category name
    ///
    /// "0", "not specified" and blank cells give `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim().to_lowercase();
        if let Ok(id) = text.parse::<u8>() {
            return Self::ALL.into_iter().find(|c| c.id() == id);
        }
        let text = text.replace(['_', '-'], " ");
        Self::ALL.into_iter().find(|c| c.as_str() == text)
    }
}

impl fmt::Display for TagCertainty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Planning record
// ============================================================================

/// One row of the D-Log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningRecord {
    pub site_ref: String,
    pub record_type: RecordType,
    pub existing_land_use: Vec<LandUseCode>,
    pub proposed_land_use: Vec<LandUseCode>,
    pub gfa: Option<f64>,
    pub existing_gfa: Option<f64>,
    pub site_area: Option<f64>,
    pub dwellings: Option<f64>,
    pub lpa: Option<String>,
    pub location: Option<GridPoint>,
    pub build_out: Option<BuildOutWindow>,
    /// Years that did not form a complete window, kept for infilling
    #[serde(default)]
    pub incomplete_build_out: Option<PartialBuildOut>,
    #[serde(default)]
    pub tag_certainty: Option<TagCertainty>,
    /// `build_out` was filled from the certainty's modal window
    #[serde(default)]
    pub build_out_imputed: bool,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub verdicts: Vec<FieldVerdict>,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
}

impl PlanningRecord {
    /// Bare record with no codes or attributes
    pub fn new(site_ref: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            site_ref: site_ref.into(),
            record_type,
            existing_land_use: Vec::new(),
            proposed_land_use: Vec::new(),
            gfa: None,
            existing_gfa: None,
            site_area: None,
            dwellings: None,
            lpa: None,
            location: None,
            build_out: None,
            incomplete_build_out: None,
            tag_certainty: None,
            build_out_imputed: false,
            status: RecordStatus::Pending,
            verdicts: Vec::new(),
            provenance: Vec::new(),
        }
    }

    pub fn codes(&self, field: CodeField) -> &[LandUseCode] {
        match field {
            CodeField::Existing => &self.existing_land_use,
            CodeField::Proposed => &self.proposed_land_use,
        }
    }

    pub fn codes_mut(&mut self, field: CodeField) -> &mut Vec<LandUseCode> {
        match field {
            CodeField::Existing => &mut self.existing_land_use,
            CodeField::Proposed => &mut self.proposed_land_use,
        }
    }

    /// No existing use is being replaced
    pub fn is_greenfield(&self) -> bool {
        self.existing_land_use.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.status == RecordStatus::Valid
    }

    pub fn attribute(&self, attribute: Attribute) -> Option<f64> {
        match attribute {
            Attribute::Gfa => self.gfa,
            Attribute::ExistingGfa => self.existing_gfa,
            Attribute::SiteArea => self.site_area,
            Attribute::Dwellings => self.dwellings,
        }
    }

    pub fn set_attribute(&mut self, attribute: Attribute, value: f64) {
        let slot = match attribute {
            Attribute::Gfa => &mut self.gfa,
            Attribute::ExistingGfa => &mut self.existing_gfa,
            Attribute::SiteArea => &mut self.site_area,
            Attribute::Dwellings => &mut self.dwellings,
        };
        *slot = Some(value);
    }

    /// Attribute value as observed in the D-Log, ignoring imputed values
    pub fn observed(&self, attribute: Attribute) -> Option<f64> {
        if self.is_imputed(attribute) {
            return None;
        }
        self.attribute(attribute)
    }

    pub fn is_imputed(&self, attribute: Attribute) -> bool {
        self.provenance.iter().any(|p| p.attribute == attribute)
    }
}
