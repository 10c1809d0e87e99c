//! Record → MSOA spatial weights
//!
//! Geometry intersection is done outside this crate; the provider only hands
//! back area shares per MSOA for a site. `LookupGeography` serves shares from
//! a precomputed table keyed by site reference.

use crate::error::{PipelineError, PipelineResult};
use crate::types::PlanningRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tolerance on the sum of MSOA weights for one record
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Area share of one MSOA in a site footprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsoaWeight {
    pub msoa_id: String,
    pub weight: f64,
}

/// Source of footprint/MSOA intersections
pub trait GeographyProvider {
    /// Raw intersection shares for a record; empty when nothing intersects
    fn intersections(&self, record: &PlanningRecord) -> Vec<MsoaWeight>;
}

/// Precomputed intersection table
#[derive(Debug, Clone, Default)]
pub struct LookupGeography {
    by_site: HashMap<String, Vec<MsoaWeight>>,
}

/// One row of the intersection table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMsoaRow {
    pub site_reference_id: String,
    pub msoa_id: String,
    pub weight: f64,
}

impl LookupGeography {
    pub fn from_rows(rows: impl IntoIterator<Item = SiteMsoaRow>) -> Self {
        let mut by_site: HashMap<String, Vec<MsoaWeight>> = HashMap::new();
        for row in rows {
            by_site
                .entry(row.site_reference_id.trim().to_string())
                .or_default()
                .push(MsoaWeight {
                    msoa_id: row.msoa_id.trim().to_string(),
                    weight: row.weight,
                });
        }
        Self { by_site }
    }

    pub fn site_count(&self) -> usize {
        self.by_site.len()
    }
}

impl GeographyProvider for LookupGeography {
    fn intersections(&self, record: &PlanningRecord) -> Vec<MsoaWeight> {
        self.by_site
            .get(record.site_ref.trim())
            .cloned()
            .unwrap_or_default()
    }
}

/// Normalised MSOA weights for one record
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialSplit {
    /// Sorted by MSOA id, summing to 1
    pub weights: Vec<MsoaWeight>,
    /// Raw sum when the provider's shares had to be rescaled
    pub renormalized_from: Option<f64>,
}

/// Spatial split of a record
///
/// Non-positive and non-finite shares are dropped and repeated MSOAs merged.
/// A record located by a point is assigned wholly to its largest-share MSOA (ties go to
/// the lowest id). Fails with `GeometryMismatch` when nothing remains.
pub fn spatial_split(
    record: &PlanningRecord,
    provider: &dyn GeographyProvider,
) -> PipelineResult<SpatialSplit> {
    let mut merged: BTreeMap<String, f64> = BTreeMap::new();
    for share in provider.intersections(record) {
        if share.weight.is_finite() && share.weight > 0.0 && !share.msoa_id.is_empty() {
            *merged.entry(share.msoa_id).or_insert(0.0) += share.weight;
        }
    }

    if merged.is_empty() {
        return Err(PipelineError::GeometryMismatch {
            record: record.site_ref.clone(),
        });
    }

    if record.location.is_some() {
        let mut best: Option<(&String, f64)> = None;
        for (msoa_id, &weight) in &merged {
            // BTreeMap order makes the first maximum the lowest id
            if best.map_or(true, |(_, w)| weight > w) {
                best = Some((msoa_id, weight));
            }
        }
        let weights = best
            .map(|(msoa_id, _)| {
                vec![MsoaWeight {
                    msoa_id: msoa_id.clone(),
                    weight: 1.0,
                }]
            })
            .unwrap_or_default();
        return Ok(SpatialSplit {
            weights,
            renormalized_from: None,
        });
    }

    let total: f64 = merged.values().sum();
    let renormalized_from = if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        Some(total)
    } else {
        None
    };
    let weights = merged
        .into_iter()
        .map(|(msoa_id, weight)| MsoaWeight {
            msoa_id,
            weight: weight / total,
        })
        .collect();

    Ok(SpatialSplit {
        weights,
        renormalized_from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridPoint, RecordType};

    fn row(site: &str, msoa: &str, weight: f64) -> SiteMsoaRow {
        SiteMsoaRow {
            site_reference_id: site.to_string(),
            msoa_id: msoa.to_string(),
            weight,
        }
    }

    fn area_record(site: &str) -> PlanningRecord {
        PlanningRecord::new(site, RecordType::Employment)
    }

    #[test]
    fn test_area_split_keeps_weights() {
        let geography = LookupGeography::from_rows(vec![
            row("1", "E02000002", 0.7),
            row("1", "E02000001", 0.3),
        ]);
        let split = spatial_split(&area_record("1"), &geography).unwrap();

        assert_eq!(split.weights.len(), 2);
        assert_eq!(split.weights[0].msoa_id, "E02000001");
        assert!((split.weights[0].weight - 0.3).abs() < 1e-12);
        assert!((split.weights[1].weight - 0.7).abs() < 1e-12);
        assert!(split.renormalized_from.is_none());
    }

    #[test]
    fn test_partial_coverage_renormalized() {
        let geography = LookupGeography::from_rows(vec![
            row("1", "A", 0.2),
            row("1", "B", 0.2),
            row("1", "B", 0.1),
            row("1", "C", -0.5),
        ]);
        let split = spatial_split(&area_record("1"), &geography).unwrap();

        let sum: f64 = split.weights.iter().map(|w| w.weight).sum();
        assert!((sum - 1.0).abs() < WEIGHT_TOLERANCE);
        assert!((split.weights[1].weight - 0.6).abs() < 1e-12);
        assert_eq!(split.renormalized_from, Some(0.5));
    }

    #[test]
    fn test_point_assigned_to_single_msoa() {
        let geography = LookupGeography::from_rows(vec![
            row("p", "B", 0.5),
            row("p", "A", 0.5),
        ]);
        let mut record = PlanningRecord::new("p", RecordType::Residential);
        record.location = Some(GridPoint {
            easting: 430_000.0,
            northing: 433_000.0,
        });

        let split = spatial_split(&record, &geography).unwrap();
        assert_eq!(
            split.weights,
            vec![MsoaWeight {
                msoa_id: "A".to_string(),
                weight: 1.0
            }]
        );
    }

    #[test]
    fn test_no_intersection_is_mismatch() {
        let geography = LookupGeography::from_rows(vec![row("1", "A", 0.0)]);
        let err = spatial_split(&area_record("1"), &geography).unwrap_err();
        assert!(matches!(err, PipelineError::GeometryMismatch { record } if record == "1"));

        let err = spatial_split(&area_record("unknown"), &geography).unwrap_err();
        assert!(!err.is_fatal());
    }
}
