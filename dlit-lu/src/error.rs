//! Error types for dlit-lu
//!
//! Per-record errors (`UnresolvableCode` from a rejected manual choice,
//! `GeometryMismatch` from the geography lookup) are recorded in the audit
//! trail or logged and never stop a batch. Per-run errors (`Configuration`,
//! `InsufficientTrainingData` without a fallback, unreadable inputs) abort the
//! owning stage.

use crate::types::{Attribute, LandUseCode};
use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Code matched none of the reference tables
    #[error("Unresolvable land use code: '{code}'")]
    UnresolvableCode { code: LandUseCode },

    /// No observed values to fit an estimator, not even globally
    #[error("Insufficient training data for {attribute} (stratum: {stratum})")]
    InsufficientTrainingData { attribute: Attribute, stratum: String },

    /// Site footprint does not intersect any MSOA
    #[error("Site {record} does not intersect any MSOA")]
    GeometryMismatch { record: String },

    /// Mandatory parameter missing or out of range
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed input row
    #[error("Invalid input in {source_name}: {message}")]
    InvalidInput { source_name: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialisation error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// dlit-common error
    #[error("Common error: {0}")]
    Common(#[from] dlit_common::Error),
}

impl PipelineError {
    /// Whether the error must abort the run
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnresolvableCode { .. } | Self::GeometryMismatch { .. }
        )
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
