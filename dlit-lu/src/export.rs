//! Output writers
//!
//! - `volumes.csv`: aggregated volume table
//! - `build_out_profile.csv`: yearly volumes (only with `build_out_years`)
//! - `records.csv`: validated and infilled D-Log with flags
//! - `audit.json`: audit trail and run statistics

use crate::audit::AuditReport;
use crate::disagg::{ProfileRow, VolumeRow};
use crate::error::PipelineResult;
use crate::pipeline::PipelineOutput;
use crate::types::{Attribute, LandUseCode, PlanningRecord, RecordStatus};
use crate::validators::VerdictKind;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub const VOLUMES_FILE: &str = "volumes.csv";
pub const PROFILE_FILE: &str = "build_out_profile.csv";
pub const RECORDS_FILE: &str = "records.csv";
pub const AUDIT_FILE: &str = "audit.json";

/// Flattened record for `records.csv`
#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    site_reference_id: &'a str,
    record_type: &'a str,
    status: RecordStatus,
    existing_land_use: String,
    proposed_land_use: String,
    gfa: Option<f64>,
    existing_gfa: Option<f64>,
    site_area_ha: Option<f64>,
    units: Option<f64>,
    lpa: Option<&'a str>,
    tag_certainty: Option<&'static str>,
    start_year: Option<i32>,
    end_year: Option<i32>,
    /// Attributes whose value was estimated
    imputed: String,
    /// Codes changed or left unresolved, as `original>resolved` pairs
    code_changes: String,
    unresolved_codes: String,
}

impl<'a> RecordRow<'a> {
    fn new(record: &'a PlanningRecord) -> Self {
        let imputed = [
            Attribute::Gfa,
            Attribute::ExistingGfa,
            Attribute::SiteArea,
            Attribute::Dwellings,
        ]
        .iter()
        .filter(|a| record.is_imputed(**a))
        .map(|a| a.as_str())
        .chain(record.build_out_imputed.then_some("build_out"))
        .collect::<Vec<_>>()
        .join(";");

        let code_changes = record
            .verdicts
            .iter()
            .filter(|v| v.kind.is_change())
            .filter_map(|v| {
                v.resolved
                    .as_ref()
                    .map(|r| format!("{}>{} ({})", v.original, r, v.kind.as_str()))
            })
            .collect::<Vec<_>>()
            .join(";");

        let unresolved_codes = record
            .verdicts
            .iter()
            .filter(|v| v.kind == VerdictKind::Unresolved)
            .map(|v| v.original.as_str())
            .collect::<Vec<_>>()
            .join(";");

        Self {
            site_reference_id: &record.site_ref,
            record_type: record.record_type.as_str(),
            status: record.status,
            existing_land_use: join_codes(&record.existing_land_use),
            proposed_land_use: join_codes(&record.proposed_land_use),
            gfa: record.gfa,
            existing_gfa: record.existing_gfa,
            site_area_ha: record.site_area,
            units: record.dwellings,
            lpa: record.lpa.as_deref(),
            tag_certainty: record.tag_certainty.map(|c| c.as_str()),
            start_year: record.build_out.map(|w| w.start_year),
            end_year: record.build_out.map(|w| w.end_year),
            imputed,
            code_changes,
            unresolved_codes,
        }
    }
}

fn join_codes(codes: &[LandUseCode]) -> String {
    codes
        .iter()
        .map(LandUseCode::as_str)
        .collect::<Vec<_>>()
        .join(";")
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> PipelineResult<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

pub fn write_volumes(path: &Path, rows: &[VolumeRow]) -> PipelineResult<()> {
    let count = write_rows(path, rows)?;
    info!(path = %path.display(), rows = count, "Volume table written");
    Ok(())
}

pub fn write_profile(path: &Path, rows: &[ProfileRow]) -> PipelineResult<()> {
    let count = write_rows(path, rows)?;
    info!(path = %path.display(), rows = count, "Build-out profile written");
    Ok(())
}

pub fn write_records(path: &Path, records: &[PlanningRecord]) -> PipelineResult<()> {
    let count = write_rows(path, records.iter().map(RecordRow::new))?;
    info!(path = %path.display(), rows = count, "Records written");
    Ok(())
}

/// Write every output of a run into `folder`, returning the files written
pub fn write_outputs(folder: &Path, output: &PipelineOutput) -> PipelineResult<Vec<PathBuf>> {
    std::fs::create_dir_all(folder)?;
    let mut written = Vec::new();

    let volumes = folder.join(VOLUMES_FILE);
    write_volumes(&volumes, &output.volume_rows)?;
    written.push(volumes);

    if let Some(profile) = &output.profile {
        let path = folder.join(PROFILE_FILE);
        write_profile(&path, profile)?;
        written.push(path);
    }

    let records = folder.join(RECORDS_FILE);
    write_records(&records, &output.records)?;
    written.push(records);

    let audit = folder.join(AUDIT_FILE);
    AuditReport::new(output.run_id, &output.statistics, &output.audit).write(&audit)?;
    written.push(audit);

    Ok(written)
}
