//! Build-out years infill
//!
//! Fills build-out windows that are missing or have only one year, using the
//! modal window of the record's TAG certainty.
//!
//! # Architecture
//! 1. **Modes:** for each certainty, the most frequent start year and the most
//!    frequent end year over complete observed windows of valid records. Ties
//!    go to the earlier year.
//! 2. **Infill:** a record with only a start year keeps it and ends one modal
//!    period later; a record with only an end year starts one modal period
//!    earlier; a record with neither takes the modal window whole.
//!
//! Records without a certainty, and invalid records, are left alone.

use crate::audit::{AuditEvent, AuditTrail};
use crate::types::{
    BuildOutDistribution, BuildOutWindow, PartialBuildOut, PlanningRecord, TagCertainty,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Which observed years an infilled window was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    /// Start year observed, end year derived from the modal period
    StartOnly,
    /// End year observed, start year derived from the modal period
    EndOnly,
    /// No usable year, modal window used whole
    Modal,
}

impl WindowSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartOnly => "start_only",
            Self::EndOnly => "end_only",
            Self::Modal => "modal",
        }
    }
}

impl fmt::Display for WindowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most common start and end year for one certainty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModalWindow {
    pub start_year: i32,
    pub end_year: i32,
}

impl ModalWindow {
    /// Years between start and end
    pub fn period(&self) -> i32 {
        self.end_year - self.start_year
    }
}

/// Modal windows keyed by certainty
#[derive(Debug, Clone, Default)]
pub struct ModalWindows {
    windows: BTreeMap<TagCertainty, ModalWindow>,
}

impl ModalWindows {
    pub fn from_records(records: &[PlanningRecord]) -> Self {
        let mut starts: BTreeMap<TagCertainty, Vec<i32>> = BTreeMap::new();
        let mut ends: BTreeMap<TagCertainty, Vec<i32>> = BTreeMap::new();
        for record in records
            .iter()
            .filter(|r| r.is_valid() && !r.build_out_imputed)
        {
            let (Some(certainty), Some(window)) = (record.tag_certainty, record.build_out) else {
                continue;
            };
            starts.entry(certainty).or_default().push(window.start_year);
            ends.entry(certainty).or_default().push(window.end_year);
        }

        let mut windows = BTreeMap::new();
        for (certainty, years) in &starts {
            let (Some(start_year), Some(mut end_year)) = (
                mode(years),
                ends.get(certainty).and_then(|years| mode(years)),
            ) else {
                continue;
            };
            if start_year > end_year {
                warn!(
                    certainty = %certainty,
                    start_year,
                    end_year,
                    "Modal start year after modal end year, using the start year for both"
                );
                end_year = start_year;
            }
            debug!(certainty = %certainty, start_year, end_year, "Modal build-out window");
            windows.insert(
                *certainty,
                ModalWindow {
                    start_year,
                    end_year,
                },
            );
        }
        Self { windows }
    }

    pub fn get(&self, certainty: TagCertainty) -> Option<ModalWindow> {
        self.windows.get(&certainty).copied()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Most frequent value, earliest on ties
fn mode(years: &[i32]) -> Option<i32> {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for year in years {
        *counts.entry(*year).or_default() += 1;
    }
    let mut best: Option<(i32, usize)> = None;
    for (year, count) in counts {
        if best.map_or(true, |(_, most)| count > most) {
            best = Some((year, count));
        }
    }
    best.map(|(year, _)| year)
}

/// Window for one record from its partial years and the modal window
///
/// An end or start year that would overflow falls back to the observed year.
pub fn complete_window(
    partial: Option<PartialBuildOut>,
    modal: ModalWindow,
) -> (BuildOutWindow, WindowSource) {
    let distribution = partial.map_or(BuildOutDistribution::Flat, |p| p.distribution);
    let period = modal.period();
    let (start_year, end_year, source) = match partial.map(|p| (p.start_year, p.end_year)) {
        Some((Some(start), None)) => (
            start,
            start.checked_add(period).unwrap_or(start),
            WindowSource::StartOnly,
        ),
        Some((None, Some(end))) => (
            end.checked_sub(period).unwrap_or(end),
            end,
            WindowSource::EndOnly,
        ),
        _ => (modal.start_year, modal.end_year, WindowSource::Modal),
    };
    let window = BuildOutWindow {
        start_year,
        end_year,
        distribution,
    };
    (window, source)
}

/// Fill missing build-out windows, returning how many were filled
pub fn infill_build_out_years(records: &mut [PlanningRecord], audit: &mut AuditTrail) -> usize {
    let modes = ModalWindows::from_records(records);
    let mut filled = 0;
    let mut without_mode = 0;

    for record in records
        .iter_mut()
        .filter(|r| r.is_valid() && r.build_out.is_none())
    {
        let Some(certainty) = record.tag_certainty else {
            continue;
        };
        let Some(modal) = modes.get(certainty) else {
            without_mode += 1;
            continue;
        };

        let (window, source) = complete_window(record.incomplete_build_out.take(), modal);
        record.build_out = Some(window);
        record.build_out_imputed = true;
        filled += 1;
        audit.record(AuditEvent::BuildOutInfilled {
            site_ref: record.site_ref.clone(),
            certainty,
            source,
            start_year: window.start_year,
            end_year: window.end_year,
        });
    }

    if without_mode > 0 {
        warn!(
            records = without_mode,
            "No observed windows for the record's certainty, build-out years left missing"
        );
    }
    info!(
        certainties = modes.len(),
        windows_imputed = filled,
        "Build-out years infilled"
    );
    filled
}
