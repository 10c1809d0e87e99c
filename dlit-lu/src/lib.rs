//! dlit-lu library interface
//!
//! Validates, infills and disaggregates a D-Log planning register.
//! Exposes the pipeline stages individually for integration testing.

pub mod audit;
pub mod disagg;
pub mod error;
pub mod export;
pub mod infill;
pub mod loader;
pub mod pipeline;
pub mod resolver;
pub mod statistics;
pub mod types;
pub mod validators;

pub use crate::error::{PipelineError, PipelineResult};
pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineInputs, PipelineOutput};
pub use crate::types::{LandUseCode, PlanningRecord, RecordType};
