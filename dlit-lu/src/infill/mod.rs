//! Attribute Infiller
//!
//! Estimates missing floor-area, site-area and dwelling figures. Build-out
//! years are filled separately by `years`.
//!
//! # Architecture
//! Two passes with a barrier between them:
//! 1. **Fit:** for every planned attribute with at least one gap, snapshot the
//!    observed values of valid records and fit one `StratumModel` per record
//!    type plus a global model.
//! 2. **Infill:** fill each gap from the model of the record's stratum, or the
//!    global mean when the stratum had no training data.
//!
//! Models are fitted from observed values only and never refitted during the
//! infill pass, so the order in which records or attributes are filled does
//! not affect any estimate.
//!
//! # Invariants
//! - A present value is never overwritten
//! - Invalid records are neither used for training nor filled
//! - Every imputed value carries a `Provenance` marker

pub mod estimators;
pub mod ols;
pub mod years;

pub use estimators::{
    estimator_for, ClampedRegressionEstimator, Estimator, MeanEstimator, Prediction,
    RegressionEstimator, StratumModel, TrainingSample, FALLBACK_EMPTY_STRATUM,
};
pub use years::{infill_build_out_years, ModalWindow, ModalWindows, WindowSource};

use crate::audit::{AuditEvent, AuditTrail};
use crate::error::{PipelineError, PipelineResult};
use crate::statistics::InfillStats;
use crate::types::{Attribute, PlanningRecord, Provenance, RecordType};
use dlit_common::InfillMethod;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Stratum label used when the global model stands in for a record type
pub const GLOBAL_STRATUM: &str = "global";

// ============================================================================
// Plan
// ============================================================================

/// One attribute to infill and the covariates its regression uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfillTarget {
    pub attribute: Attribute,
    pub covariates: Vec<Attribute>,
}

/// Attributes to infill, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfillPlan {
    pub targets: Vec<InfillTarget>,
}

impl Default for InfillPlan {
    fn default() -> Self {
        let target = |attribute, covariates: &[Attribute]| InfillTarget {
            attribute,
            covariates: covariates.to_vec(),
        };
        Self {
            targets: vec![
                target(Attribute::SiteArea, &[Attribute::Gfa]),
                target(Attribute::Gfa, &[Attribute::SiteArea]),
                target(Attribute::Dwellings, &[Attribute::SiteArea]),
                target(Attribute::ExistingGfa, &[Attribute::SiteArea]),
            ],
        }
    }
}

// ============================================================================
// Model
// ============================================================================

/// Fitted estimator for one attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfillModel {
    pub attribute: Attribute,
    pub method: InfillMethod,
    pub covariates: Vec<Attribute>,
    pub strata: BTreeMap<RecordType, StratumModel>,
    pub global: StratumModel,
}

/// Observed, plausible value: finite and non-negative
fn plausible(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Observed covariate vector, `None` if any covariate is missing or imputed
fn observed_covariates(record: &PlanningRecord, covariates: &[Attribute]) -> Option<Vec<f64>> {
    covariates
        .iter()
        .map(|&attribute| plausible(record.observed(attribute)))
        .collect()
}

/// Whether a record may train the model for `attribute`
fn is_training_record(record: &PlanningRecord, attribute: Attribute) -> bool {
    record.is_valid() && attribute.applies_to(record)
}

/// Whether a record has a gap the infiller should fill
pub fn needs_infill(record: &PlanningRecord, attribute: Attribute) -> bool {
    record.is_valid() && attribute.applies_to(record) && record.attribute(attribute).is_none()
}

/// Fit a model for `target` over the valid records in `records`
///
/// Fails with `InsufficientTrainingData` when no record has an observed value.
pub fn fit(
    records: &[PlanningRecord],
    target: &InfillTarget,
    estimator: &dyn Estimator,
) -> PipelineResult<InfillModel> {
    let attribute = target.attribute;
    let mut by_stratum: BTreeMap<RecordType, Vec<TrainingSample>> = BTreeMap::new();

    for record in records.iter().filter(|r| is_training_record(r, attribute)) {
        let Some(value) = plausible(record.observed(attribute)) else {
            continue;
        };
        by_stratum
            .entry(record.record_type)
            .or_default()
            .push(TrainingSample {
                target: value,
                covariates: observed_covariates(record, &target.covariates),
            });
    }

    let all: Vec<TrainingSample> = by_stratum.values().flatten().cloned().collect();
    if all.is_empty() {
        return Err(PipelineError::InsufficientTrainingData {
            attribute,
            stratum: GLOBAL_STRATUM.to_string(),
        });
    }

    let covariate_count = target.covariates.len();
    let global = estimator.fit(&all, covariate_count);
    let strata: BTreeMap<RecordType, StratumModel> = by_stratum
        .iter()
        .map(|(&record_type, samples)| (record_type, estimator.fit(samples, covariate_count)))
        .collect();

    for record_type in RecordType::ALL {
        if !strata.contains_key(&record_type) {
            debug!(
                attribute = %attribute,
                stratum = %record_type,
                "No training data in stratum, global mean will be used"
            );
        }
    }

    info!(
        attribute = %attribute,
        method = estimator.method().as_str(),
        samples = all.len(),
        strata = strata.len(),
        "Fitted infill model"
    );

    Ok(InfillModel {
        attribute,
        method: estimator.method(),
        covariates: target.covariates.clone(),
        strata,
        global,
    })
}

/// Result of filling one gap
#[derive(Debug, Clone, PartialEq)]
pub struct Imputation {
    pub provenance: Provenance,
    /// Model output before clamping
    pub raw_prediction: f64,
}

/// Fill `model.attribute` on one record if it is missing
///
/// Returns `None` when the record already has a value, is invalid, or does
/// not carry this attribute.
pub fn infill(record: &mut PlanningRecord, model: &InfillModel) -> Option<Imputation> {
    if !needs_infill(record, model.attribute) {
        return None;
    }

    let covariates = observed_covariates(record, &model.covariates);
    let (prediction, stratum) = match model.strata.get(&record.record_type) {
        Some(stratum_model) => (
            stratum_model.predict(covariates.as_deref()),
            record.record_type.as_str().to_string(),
        ),
        None => {
            let mut prediction = model.global.predict(None);
            prediction.fallback = Some(FALLBACK_EMPTY_STRATUM);
            (prediction, GLOBAL_STRATUM.to_string())
        }
    };

    record.set_attribute(model.attribute, prediction.value);
    let provenance = Provenance {
        attribute: model.attribute,
        method: prediction.method.to_string(),
        stratum,
        original_missing: true,
        clamped: prediction.clamped,
        fallback: prediction.fallback.map(str::to_string),
        value: prediction.value,
    };
    record.provenance.push(provenance.clone());

    if prediction.clamped {
        warn!(
            site_ref = %record.site_ref,
            attribute = %model.attribute,
            prediction = prediction.raw,
            "Negative prediction clamped to zero"
        );
    }
    Some(Imputation {
        provenance,
        raw_prediction: prediction.raw,
    })
}

// ============================================================================
// Infiller
// ============================================================================

/// Fits and applies infill models for a plan
#[derive(Debug)]
pub struct AttributeInfiller {
    plan: InfillPlan,
    estimator: Box<dyn Estimator>,
}

impl AttributeInfiller {
    pub fn new(method: InfillMethod, plan: InfillPlan) -> Self {
        Self {
            plan,
            estimator: estimator_for(method),
        }
    }

    pub fn method(&self) -> InfillMethod {
        self.estimator.method()
    }

    /// Fit a model for every planned attribute that has a gap
    pub fn fit_models(&self, records: &[PlanningRecord]) -> PipelineResult<Vec<InfillModel>> {
        let mut models = Vec::new();
        for target in &self.plan.targets {
            let gaps = records
                .iter()
                .filter(|r| needs_infill(r, target.attribute))
                .count();
            if gaps == 0 {
                debug!(attribute = %target.attribute, "No gaps, skipping model fit");
                continue;
            }
            models.push(fit(records, target, self.estimator.as_ref())?);
        }
        Ok(models)
    }

    /// Fill every gap covered by `models`, recording audit events
    pub fn infill_all(
        &self,
        records: &mut [PlanningRecord],
        models: &[InfillModel],
        audit: &mut AuditTrail,
    ) -> InfillStats {
        let mut stats = InfillStats {
            models_fitted: models.len(),
            ..InfillStats::default()
        };

        for record in records.iter_mut() {
            let mut filled_any = false;
            for model in models {
                let Some(Imputation {
                    provenance,
                    raw_prediction,
                }) = infill(record, model)
                else {
                    continue;
                };
                filled_any = true;
                stats.values_imputed += 1;
                if provenance.fallback.is_some() {
                    stats.fallbacks += 1;
                }
                if provenance.clamped {
                    stats.clamped += 1;
                    audit.record(AuditEvent::Clamped {
                        site_ref: record.site_ref.clone(),
                        attribute: model.attribute,
                        prediction: raw_prediction,
                    });
                }
                audit.record(AuditEvent::Imputed {
                    site_ref: record.site_ref.clone(),
                    provenance,
                });
            }
            if filled_any {
                stats.records_infilled.increment(record.record_type);
            }
        }

        info!("Infill complete: {}", stats.display_string());
        stats
    }

    /// Fit then infill
    pub fn run(
        &self,
        records: &mut [PlanningRecord],
        audit: &mut AuditTrail,
    ) -> PipelineResult<InfillStats> {
        info!(method = self.method().as_str(), "Infilling missing attributes");
        let models = self.fit_models(records)?;
        Ok(self.infill_all(records, &models, audit))
    }
}
