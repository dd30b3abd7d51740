use serde::Serialize;

use super::model::Series;
use super::preprocess::mean_std;
use crate::error::PreprocessError;

/// Descriptive features for consumers that do not run inference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Features {
    pub freqs: Vec<f64>,
    pub mags: Vec<f64>,
    /// d(mag)/d(freq) at every point.
    pub derivative: Vec<f64>,
    pub peak_count: usize,
    pub mean: f64,
    pub std: f64,
}

/// Derivative, peak count and moments of a series (sorted by frequency first).
///
/// Needs at least two distinct frequencies for the derivative.
pub fn featurize(series: &Series) -> Result<Features, PreprocessError> {
    if series.is_empty() {
        return Err(PreprocessError::EmptySeries);
    }
    let sorted = series.sorted();
    if sorted.len() < 2 {
        return Err(PreprocessError::TooShortForDerivative(sorted.len()));
    }

    let derivative = gradient(&sorted.mags, &sorted.freqs);
    let peak_count = count_peaks(&sorted.mags);
    let (mean, std) = mean_std(&sorted.mags);

    Ok(Features {
        freqs: sorted.freqs,
        mags: sorted.mags,
        derivative,
        peak_count,
        mean,
        std,
    })
}

/// Second-order accurate central differences on a non-uniform axis, one-sided
/// first differences at both ends.  `x` must be strictly increasing with at
/// least two points.
pub fn gradient(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len();
    let mut out = vec![0.0; n];
    out[0] = (y[1] - y[0]) / (x[1] - x[0]);
    out[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n.saturating_sub(1) {
        let hd = x[i] - x[i - 1];
        let hs = x[i + 1] - x[i];
        out[i] = (hd * hd * y[i + 1] - hs * hs * y[i - 1] + (hs * hs - hd * hd) * y[i])
            / (hs * hd * (hd + hs));
    }
    out
}

/// Points strictly greater than both neighbours.
///
/// The comparison treats the missing neighbour past either end as always
/// lower, so a boundary point counts when it exceeds its single inner
/// neighbour, and a single-point series counts as one peak.
pub fn count_peaks(values: &[f64]) -> usize {
    let n = values.len();
    (0..n)
        .filter(|&i| {
            let above_left = i == 0 || values[i] > values[i - 1];
            let above_right = i + 1 == n || values[i] > values[i + 1];
            above_left && above_right
        })
        .count()
}
