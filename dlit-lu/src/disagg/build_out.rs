//! Build-out profiles
//!
//! Spreads a site's volume over the years of its build-out window.
//!
//! For a window of `n` years and 1-based year index `k`:
//! - flat: `1/n`
//! - early: `2^(n-k) / (2^n - 1)`
//! - late: `2^(k-1) / (2^n - 1)`
//! - mid: `2^(k-1)` rising to the midpoint then falling symmetrically,
//!   over `(2^⌊(n+1)/2⌋ - 1) + (2^⌊n/2⌋ - 1)`
//!
//! Weights are computed as halving ratios and normalised by their sum, which
//! gives the same values without overflowing for long windows.

use crate::types::{BuildOutDistribution, BuildOutWindow};
use dlit_common::config::YearRange;

/// Annual weights for `years` years, summing to 1
///
/// Empty when `years` is zero.
pub fn weights(years: usize, distribution: BuildOutDistribution) -> Vec<f64> {
    if years == 0 {
        return Vec::new();
    }
    let n = years as i32;
    let half = 0.5_f64;
    let rising_len = (n + 1) / 2;

    let raw: Vec<f64> = (1..=n)
        .map(|k| match distribution {
            BuildOutDistribution::Flat => 1.0,
            BuildOutDistribution::Early => half.powi(k - 1),
            BuildOutDistribution::Late => half.powi(n - k),
            BuildOutDistribution::Mid => {
                if k <= rising_len {
                    half.powi(rising_len - k)
                } else {
                    half.powi(k - rising_len - 1 + (rising_len - n / 2))
                }
            }
        })
        .collect();

    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}

/// Year and weight for each year of a window
///
/// `None` when the window ends before it starts.
pub fn annual_profile(window: &BuildOutWindow) -> Option<Vec<(i32, f64)>> {
    let span = i64::from(window.end_year) - i64::from(window.start_year) + 1;
    let years = usize::try_from(span).ok().filter(|years| *years > 0)?;
    Some(
        (window.start_year..=window.end_year)
            .zip(weights(years, window.distribution))
            .collect(),
    )
}

/// Profile restricted to the configured reporting years
pub fn profile_within(window: &BuildOutWindow, range: &YearRange) -> Option<Vec<(i32, f64)>> {
    annual_profile(window).map(|profile| {
        profile
            .into_iter()
            .filter(|(year, _)| *year >= range.start && *year <= range.end)
            .collect()
    })
}
