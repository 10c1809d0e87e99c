//! Infill estimators
//!
//! Three strategies behind one fitting interface, chosen once per run from
//! `InfillMethod`:
//! - `MeanEstimator`: arithmetic mean of the stratum
//! - `RegressionEstimator`: OLS on the configured covariates
//! - `ClampedRegressionEstimator`: OLS with negative predictions replaced by zero
//!
//! Regression models keep the stratum mean so a record whose covariates are
//! missing, or a stratum too small to fit, still gets an estimate.

use super::ols;
use dlit_common::InfillMethod;
use serde::Serialize;

/// One training observation
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub target: f64,
    /// Observed covariates, `None` when any covariate is missing
    pub covariates: Option<Vec<f64>>,
}

/// Fallback reasons recorded in provenance
pub const FALLBACK_UNDERDETERMINED: &str = "underdetermined_stratum";
pub const FALLBACK_SINGULAR: &str = "singular_design";
pub const FALLBACK_MISSING_COVARIATE: &str = "covariate_not_observed";
pub const FALLBACK_EMPTY_STRATUM: &str = "empty_stratum_global_mean";

/// Fitted model for one (attribute, stratum)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumModel {
    /// Mean of the training targets
    pub mean: f64,
    /// Training observations
    pub samples: usize,
    /// OLS coefficients, intercept first
    pub coefficients: Option<Vec<f64>>,
    /// Replace negative predictions by zero
    pub clamp: bool,
    /// Why a regression estimator produced a mean-only model
    pub fit_fallback: Option<&'static str>,
}

/// Single estimate with the details needed for provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub value: f64,
    /// Unclamped model output
    pub raw: f64,
    pub clamped: bool,
    /// Method that produced the value
    pub method: &'static str,
    pub fallback: Option<&'static str>,
}

impl StratumModel {
    fn mean_only(samples: &[TrainingSample], fit_fallback: Option<&'static str>) -> Self {
        let mean = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.target).sum::<f64>() / samples.len() as f64
        };
        Self {
            mean,
            samples: samples.len(),
            coefficients: None,
            clamp: false,
            fit_fallback,
        }
    }

    /// Estimate from the record's observed covariates
    pub fn predict(&self, covariates: Option<&[f64]>) -> Prediction {
        match (&self.coefficients, covariates) {
            (Some(coefficients), Some(covariates)) => {
                let raw = ols::predict(coefficients, covariates);
                let clamped = self.clamp && raw < 0.0;
                Prediction {
                    value: if clamped { 0.0 } else { raw },
                    raw,
                    clamped,
                    method: if self.clamp {
                        InfillMethod::RegressionNoNegatives.as_str()
                    } else {
                        InfillMethod::Regression.as_str()
                    },
                    fallback: None,
                }
            }
            (Some(_), None) => self.mean_prediction(Some(FALLBACK_MISSING_COVARIATE)),
            (None, _) => self.mean_prediction(self.fit_fallback),
        }
    }

    fn mean_prediction(&self, fallback: Option<&'static str>) -> Prediction {
        Prediction {
            value: self.mean,
            raw: self.mean,
            clamped: false,
            method: InfillMethod::Mean.as_str(),
            fallback,
        }
    }
}

/// Fitting interface shared by all strategies
pub trait Estimator: std::fmt::Debug {
    fn method(&self) -> InfillMethod;

    /// Fit one stratum; `samples` is non-empty
    fn fit(&self, samples: &[TrainingSample], covariate_count: usize) -> StratumModel;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeanEstimator;

impl Estimator for MeanEstimator {
    fn method(&self) -> InfillMethod {
        InfillMethod::Mean
    }

    fn fit(&self, samples: &[TrainingSample], _covariate_count: usize) -> StratumModel {
        StratumModel::mean_only(samples, None)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionEstimator;

impl Estimator for RegressionEstimator {
    fn method(&self) -> InfillMethod {
        InfillMethod::Regression
    }

    fn fit(&self, samples: &[TrainingSample], covariate_count: usize) -> StratumModel {
        fit_regression(samples, covariate_count, false)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClampedRegressionEstimator;

impl Estimator for ClampedRegressionEstimator {
    fn method(&self) -> InfillMethod {
        InfillMethod::RegressionNoNegatives
    }

    fn fit(&self, samples: &[TrainingSample], covariate_count: usize) -> StratumModel {
        fit_regression(samples, covariate_count, true)
    }
}

fn fit_regression(samples: &[TrainingSample], covariate_count: usize, clamp: bool) -> StratumModel {
    let (xs, ys): (Vec<Vec<f64>>, Vec<f64>) = samples
        .iter()
        .filter_map(|s| s.covariates.clone().map(|c| (c, s.target)))
        .unzip();

    if covariate_count == 0 || ys.len() < covariate_count + 1 {
        return StratumModel::mean_only(samples, Some(FALLBACK_UNDERDETERMINED));
    }

    match ols::least_squares(&xs, &ys) {
        Some(coefficients) => StratumModel {
            coefficients: Some(coefficients),
            clamp,
            ..StratumModel::mean_only(samples, None)
        },
        None => StratumModel::mean_only(samples, Some(FALLBACK_SINGULAR)),
    }
}

/// Strategy for the configured method
pub fn estimator_for(method: InfillMethod) -> Box<dyn Estimator> {
    match method {
        InfillMethod::Mean => Box::new(MeanEstimator),
        InfillMethod::Regression => Box::new(RegressionEstimator),
        InfillMethod::RegressionNoNegatives => Box::new(ClampedRegressionEstimator),
    }
}
