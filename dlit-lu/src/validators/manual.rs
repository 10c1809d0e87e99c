//! Manual code resolution
//!
//! When `user_infill` is enabled, codes the resolver cannot settle are offered
//! to a `ManualResolver`. The worksheet implementation keeps user choices in a
//! CSV file that persists across runs:
//!
//! ```text
//! site_reference_id,field,original_code,candidates,chosen_code,rejected_code
//! 1043,proposed,E,E(g);E(g)(i),E(g)(i),
//! 2210,existing,zz9,,,
//! 3100,proposed,E,E(g);E(g)(i),,Eg(x)
//! ```
//!
//! Rows with an empty `chosen_code` are questions still waiting for an answer.
//! Unanswered queries from a run are appended as blank rows when the worksheet
//! is written back. An answer that does not resolve to a valid code is moved
//! to `rejected_code` and the question is asked again.

use crate::error::{PipelineError, PipelineResult};
use crate::types::{normalize_code, CodeField, LandUseCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Separator between candidate codes in one worksheet cell
pub const CANDIDATE_SEPARATOR: &str = ";";

/// Question put to the manual-resolution collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct ManualRequest {
    pub site_ref: String,
    pub field: CodeField,
    pub original: LandUseCode,
    pub candidates: Vec<LandUseCode>,
}

/// Source of user-chosen codes
pub trait ManualResolver {
    /// Return the user's chosen code, or `None` when there is no answer
    fn resolve(&mut self, request: &ManualRequest) -> Option<LandUseCode>;

    /// The answer returned for `request` was not a valid code
    fn reject(&mut self, _request: &ManualRequest, _chosen: &LandUseCode) {}
}

/// Resolver used when `user_infill` is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoManualResolution;

impl ManualResolver for NoManualResolution {
    fn resolve(&mut self, _request: &ManualRequest) -> Option<LandUseCode> {
        None
    }
}

/// One worksheet row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksheetRow {
    pub site_reference_id: String,
    pub field: CodeField,
    pub original_code: String,
    #[serde(default)]
    pub candidates: String,
    #[serde(default)]
    pub chosen_code: Option<String>,
    /// Last answer that failed to resolve
    #[serde(default)]
    pub rejected_code: Option<String>,
}

impl WorksheetRow {
    fn key(&self) -> WorksheetKey {
        (
            self.site_reference_id.trim().to_string(),
            self.field,
            normalize_code(&self.original_code),
        )
    }

    fn chosen(&self) -> Option<LandUseCode> {
        self.chosen_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(LandUseCode::new)
    }
}

type WorksheetKey = (String, CodeField, String);

fn request_key(request: &ManualRequest) -> WorksheetKey {
    (
        request.site_ref.trim().to_string(),
        request.field,
        request.original.normalized(),
    )
}

/// Manual resolver backed by a CSV worksheet
#[derive(Debug, Clone, Default)]
pub struct WorksheetResolver {
    /// All rows, answered or not, keyed for lookup
    rows: BTreeMap<WorksheetKey, WorksheetRow>,
    /// Queries made during this run that had no answer
    unanswered: Vec<WorksheetKey>,
}

impl WorksheetResolver {
    pub fn from_rows(rows: impl IntoIterator<Item = WorksheetRow>) -> Self {
        let mut resolver = Self::default();
        for row in rows {
            resolver.rows.insert(row.key(), row);
        }
        resolver
    }

    /// Load a worksheet; a missing file yields an empty worksheet
    pub fn load(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "Manual resolution worksheet not found, starting an empty one"
            );
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        let mut rows = Vec::new();
        for (line, row) in reader.deserialize::<WorksheetRow>().enumerate() {
            let row = row.map_err(|e| PipelineError::InvalidInput {
                source_name: path.display().to_string(),
                message: format!("row {}: {}", line + 1, e),
            })?;
            rows.push(row);
        }

        let resolver = Self::from_rows(rows);
        info!(
            path = %path.display(),
            rows = resolver.rows.len(),
            answered = resolver.answered_count(),
            "Loaded manual resolution worksheet"
        );
        Ok(resolver)
    }

    pub fn answered_count(&self) -> usize {
        self.rows.values().filter(|r| r.chosen().is_some()).count()
    }

    /// Queries from this run still waiting for a user choice
    pub fn unanswered(&self) -> impl Iterator<Item = &WorksheetRow> {
        self.unanswered.iter().filter_map(|key| self.rows.get(key))
    }

    /// Write every row back, answered rows first, blank rows for open queries
    pub fn write(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (answered, open): (Vec<&WorksheetRow>, Vec<&WorksheetRow>) =
            self.rows.values().partition(|r| r.chosen().is_some());

        let mut writer = csv::Writer::from_path(path)?;
        for row in answered.iter().chain(open.iter()) {
            writer.serialize(row)?;
        }
        writer.flush()?;

        info!(
            path = %path.display(),
            answered = answered.len(),
            open = open.len(),
            "Manual resolution worksheet written"
        );
        Ok(())
    }
}

impl ManualResolver for WorksheetResolver {
    fn resolve(&mut self, request: &ManualRequest) -> Option<LandUseCode> {
        let key = request_key(request);

        if let Some(chosen) = self.rows.get(&key).and_then(WorksheetRow::chosen) {
            debug!(
                site_ref = %request.site_ref,
                original = %request.original,
                chosen = %chosen,
                "Worksheet answer found"
            );
            return Some(chosen);
        }

        let candidates = request
            .candidates
            .iter()
            .map(LandUseCode::as_str)
            .collect::<Vec<_>>()
            .join(CANDIDATE_SEPARATOR);
        self.rows.entry(key.clone()).or_insert_with(|| WorksheetRow {
            site_reference_id: request.site_ref.clone(),
            field: request.field,
            original_code: request.original.as_str().to_string(),
            candidates,
            chosen_code: None,
            rejected_code: None,
        });
        if !self.unanswered.contains(&key) {
            self.unanswered.push(key);
        }
        None
    }

    fn reject(&mut self, request: &ManualRequest, chosen: &LandUseCode) {
        let key = request_key(request);
        let Some(row) = self.rows.get_mut(&key) else {
            return;
        };
        row.chosen_code = None;
        row.rejected_code = Some(chosen.as_str().to_string());
        if !self.unanswered.contains(&key) {
            self.unanswered.push(key);
        }
    }
}

/// Answers from an in-memory map, keyed by (site, field, normalised code)
impl ManualResolver for HashMap<(String, CodeField, String), LandUseCode> {
    fn resolve(&mut self, request: &ManualRequest) -> Option<LandUseCode> {
        self.get(&(
            request.site_ref.clone(),
            request.field,
            request.original.normalized(),
        ))
        .cloned()
    }
}
