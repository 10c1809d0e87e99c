//! Record validation
//!
//! Applies the code resolver to every land-use code on every record and keeps
//! a per-field verdict trail.
//!
//! # Verdicts
//! - **Valid:** code found in the valid table, left untouched
//! - **Corrected:** replaced via the OutOfDate or KnownInvalid tables
//! - **Inferred:** replaced by the single candidate of an incomplete code
//! - **ManuallyResolved:** replaced by a user choice that resolves to a valid code
//! - **Unresolved:** left unchanged; the record is marked invalid

pub mod manual;
pub mod record_validator;

pub use manual::{ManualRequest, ManualResolver, NoManualResolution, WorksheetResolver};
pub use record_validator::RecordValidator;

use crate::resolver::ResolutionStatus;
use crate::types::{FieldRef, LandUseCode};
use serde::{Deserialize, Serialize};

/// Outcome category for one code field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Valid,
    Corrected,
    Inferred,
    ManuallyResolved,
    Unresolved,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Corrected => "corrected",
            Self::Inferred => "inferred",
            Self::ManuallyResolved => "manually_resolved",
            Self::Unresolved => "unresolved",
        }
    }

    /// Field value was replaced
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Corrected | Self::Inferred | Self::ManuallyResolved
        )
    }
}

/// Verdict for one land-use code on one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldVerdict {
    pub field: FieldRef,
    pub original: LandUseCode,
    pub kind: VerdictKind,
    /// Classification of the original code
    pub status: ResolutionStatus,
    /// Value written to the field, for changed verdicts
    pub resolved: Option<LandUseCode>,
    /// Candidates offered, for ambiguous incomplete codes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<LandUseCode>,
}
