use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::model::{Grid, ProcessedVector, Series};
use crate::error::PreprocessError;

/// Guard added to the standard deviation in [`normalize`].
pub const NORMALIZE_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Smoothing parameters
// ---------------------------------------------------------------------------

/// Savitzky–Golay window and polynomial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Smoothing {
    pub window: usize,
    pub poly_order: usize,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            window: 11,
            poly_order: 3,
        }
    }
}

impl Smoothing {
    /// Window must be odd and strictly larger than the polynomial order.
    pub fn validate(&self) -> Result<(), PreprocessError> {
        if self.window % 2 == 0 || self.poly_order >= self.window {
            return Err(PreprocessError::InvalidWindow {
                window: self.window,
                poly_order: self.poly_order,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Resample onto `target_length` evenly spaced points across the series'
/// frequency range, then smooth and normalise.
pub fn preprocess(
    series: &Series,
    target_length: usize,
    smoothing: &Smoothing,
) -> Result<ProcessedVector, PreprocessError> {
    let grid = Grid::spanning(series, target_length)?;
    preprocess_on_grid(series, &grid, smoothing)
}

/// [`preprocess`] against a caller-built grid.
pub fn preprocess_on_grid(
    series: &Series,
    grid: &Grid,
    smoothing: &Smoothing,
) -> Result<ProcessedVector, PreprocessError> {
    if grid.is_empty() {
        return Err(PreprocessError::EmptyGrid);
    }
    let resampled = resample_to_grid(series, grid)?;
    let smoothed = smooth(&resampled, smoothing.window, smoothing.poly_order)?;
    let values = normalize(&smoothed);
    if values.iter().any(|v| !v.is_finite()) {
        return Err(PreprocessError::NonFinite("processed vector"));
    }
    log::debug!("preprocessed {} points onto a {}-point grid", series.len(), values.len());
    Ok(ProcessedVector { values })
}

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

/// Linear interpolation of the magnitudes at every grid frequency.
///
/// Grid points outside the series' range take the nearest boundary magnitude
/// (clamped, never extrapolated).  Unsorted input is sorted first; duplicate
/// frequencies keep their first occurrence.
pub fn resample_to_grid(series: &Series, grid: &Grid) -> Result<Vec<f64>, PreprocessError> {
    if series.freqs.len() != series.mags.len() {
        return Err(PreprocessError::LengthMismatch {
            freqs: series.freqs.len(),
            mags: series.mags.len(),
        });
    }
    if series.is_empty() {
        return Err(PreprocessError::EmptySeries);
    }
    if series.freqs.iter().chain(&series.mags).any(|v| !v.is_finite()) {
        return Err(PreprocessError::NonFinite("series"));
    }
    if grid.points().iter().any(|g| !g.is_finite()) {
        return Err(PreprocessError::NonFinite("grid"));
    }

    let strictly_increasing = series.freqs.windows(2).all(|w| w[0] < w[1]);
    let sorted;
    let series = if strictly_increasing {
        series
    } else {
        sorted = series.sorted();
        &sorted
    };

    let xs = &series.freqs;
    let ys = &series.mags;
    let last = xs.len() - 1;

    Ok(grid
        .points()
        .iter()
        .map(|&g| {
            if g <= xs[0] {
                return ys[0];
            }
            if g >= xs[last] {
                return ys[last];
            }
            // First index with xs[j] > g; 1 <= j <= last here.
            let j = xs.partition_point(|&x| x <= g);
            let (x0, x1) = (xs[j - 1], xs[j]);
            let (y0, y1) = (ys[j - 1], ys[j]);
            y0 + (y1 - y0) * (g - x0) / (x1 - x0)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Savitzky–Golay smoothing
// ---------------------------------------------------------------------------

/// Local polynomial smoothing.
///
/// Returns the input unchanged when it is shorter than `window`.  Edges are
/// handled by fitting one polynomial to the first (last) full window and
/// evaluating it at the edge positions.
pub fn smooth(signal: &[f64], window: usize, poly_order: usize) -> Result<Vec<f64>, PreprocessError> {
    if signal.len() < window {
        return Ok(signal.to_vec());
    }
    Smoothing { window, poly_order }.validate()?;

    let n = signal.len();
    let half = window / 2;
    let mut out = vec![0.0; n];

    let center = fit_weights(window, poly_order, 0);
    for i in half..(n - half) {
        out[i] = dot(&center, &signal[i - half..=i + half]);
    }

    let head = &signal[..window];
    let tail = &signal[n - window..];
    for k in 0..half {
        let offset = k as isize - half as isize;
        out[k] = dot(&fit_weights(window, poly_order, offset), head);
        let offset = (half - k) as isize;
        out[n - 1 - k] = dot(&fit_weights(window, poly_order, offset), tail);
    }

    Ok(out)
}

/// Least-squares weights that evaluate the window's fitted polynomial at
/// `offset` positions from the window centre.
fn fit_weights(window: usize, poly_order: usize, offset: isize) -> Vec<f64> {
    let half = (window / 2) as f64;
    let scale = if half > 0.0 { half } else { 1.0 };
    let terms = poly_order + 1;

    // Vandermonde matrix over positions scaled to [-1, 1].
    let mut a = Array2::<f64>::zeros((window, terms));
    for (i, mut row) in a.rows_mut().into_iter().enumerate() {
        let x = (i as f64 - half) / scale;
        for (j, val) in row.iter_mut().enumerate() {
            *val = x.powi(j as i32);
        }
    }

    let t = offset as f64 / scale;
    let v: Array1<f64> = (0..terms).map(|j| t.powi(j as i32)).collect();
    let ata = a.t().dot(&a);
    let z = solve(ata, v);
    a.dot(&z).to_vec()
}

/// Gaussian elimination with partial pivoting on a small dense system.
fn solve(mut m: Array2<f64>, mut b: Array1<f64>) -> Array1<f64> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&r, &s| m[[r, col]].abs().total_cmp(&m[[s, col]].abs()))
            .unwrap_or(col);
        if pivot != col {
            for k in 0..n {
                m.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        let diag = m[[col, col]];
        if diag == 0.0 {
            continue;
        }
        for r in (col + 1)..n {
            let factor = m[[r, col]] / diag;
            for k in col..n {
                m[[r, k]] -= factor * m[[col, k]];
            }
            b[r] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for r in (0..n).rev() {
        let tail: f64 = ((r + 1)..n).map(|k| m[[r, k]] * x[k]).sum();
        let diag = m[[r, r]];
        x[r] = if diag == 0.0 { 0.0 } else { (b[r] - tail) / diag };
    }
    x
}

fn dot(weights: &[f64], values: &[f64]) -> f64 {
    weights.iter().zip(values).map(|(w, v)| w * v).sum()
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Zero mean, unit (population) standard deviation, with an epsilon guard so
/// a constant signal maps to zeros.
pub fn normalize(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let (mean, std) = mean_std(signal);
    let denom = std + NORMALIZE_EPSILON;
    signal.iter().map(|v| (v - mean) / denom).collect()
}

/// Sample mean and population standard deviation.
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(freqs: &[f64], mags: &[f64]) -> Series {
        Series::new(freqs.to_vec(), mags.to_vec()).unwrap()
    }

    fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn resample_identity_on_own_grid() {
        let s = series(&[1.0, 2.5, 7.0, 10.0], &[0.3, -1.0, 4.0, 2.0]);
        let grid = Grid::from(s.freqs.clone());
        let out = resample_to_grid(&s, &grid).unwrap();
        assert!(close(&out, &s.mags, 1e-12));
    }

    #[test]
    fn resample_interpolates_and_clamps() {
        let s = series(&[10.0, 20.0], &[1.0, 3.0]);
        let grid = Grid::from(vec![0.0, 10.0, 15.0, 20.0, 99.0]);
        let out = resample_to_grid(&s, &grid).unwrap();
        assert!(close(&out, &[1.0, 1.0, 2.0, 3.0, 3.0], 1e-12));
    }

    #[test]
    fn resample_sorts_unsorted_input() {
        let s = series(&[20.0, 10.0], &[3.0, 1.0]);
        let out = resample_to_grid(&s, &Grid::from(vec![15.0])).unwrap();
        assert!(close(&out, &[2.0], 1e-12));
    }

    #[test]
    fn resample_rejects_non_finite_grid() {
        let s = series(&[1.0, 2.0], &[1.0, 2.0]);
        assert_eq!(
            resample_to_grid(&s, &Grid::from(vec![1.5, f64::NAN])),
            Err(PreprocessError::NonFinite("grid"))
        );
        assert_eq!(
            resample_to_grid(&s, &Grid::from(vec![f64::INFINITY])),
            Err(PreprocessError::NonFinite("grid"))
        );
    }

    #[test]
    fn preprocess_rejects_overflowing_frequency_span() {
        let s = series(&[-1e308, 1e308], &[1.0, 2.0]);
        assert_eq!(
            preprocess(&s, 4, &Smoothing::default()),
            Err(PreprocessError::NonFinite("grid step"))
        );
    }

    #[test]
    fn resample_single_point_is_constant() {
        let s = series(&[5.0], &[7.0]);
        let out = resample_to_grid(&s, &Grid::from(vec![1.0, 5.0, 9.0])).unwrap();
        assert_eq!(out, vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn smooth_noop_when_shorter_than_window() {
        let signal = vec![1.0, 5.0, -2.0, 8.0];
        assert_eq!(smooth(&signal, 11, 3).unwrap(), signal);
        // Even an invalid window degrades to a no-op on short input.
        assert_eq!(smooth(&signal, 6, 3).unwrap(), signal);
    }

    #[test]
    fn smooth_rejects_bad_parameters() {
        let signal = vec![0.0; 20];
        assert!(smooth(&signal, 10, 3).is_err());
        assert!(smooth(&signal, 5, 5).is_err());
    }

    #[test]
    fn smooth_preserves_low_order_polynomials() {
        // A cubic is reproduced exactly by a cubic fit, edges included.
        let signal: Vec<f64> = (0..25)
            .map(|i| {
                let x = i as f64 * 0.1;
                1.0 - 2.0 * x + 0.5 * x * x - 0.25 * x * x * x
            })
            .collect();
        let out = smooth(&signal, 11, 3).unwrap();
        assert!(close(&out, &signal, 1e-9));
    }

    #[test]
    fn smooth_matches_known_coefficients() {
        // Window 5, order 2 centre weights: [-3, 12, 17, 12, -3] / 35.
        let w = fit_weights(5, 2, 0);
        let expected: Vec<f64> = [-3.0, 12.0, 17.0, 12.0, -3.0].iter().map(|c| c / 35.0).collect();
        assert!(close(&w, &expected, 1e-12));
    }

    #[test]
    fn smooth_reduces_alternating_noise() {
        let signal: Vec<f64> = (0..40)
            .map(|i| i as f64 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let out = smooth(&signal, 7, 2).unwrap();
        let rough = |v: &[f64]| v.windows(2).map(|w| (w[1] - w[0] - 1.0).powi(2)).sum::<f64>();
        assert!(rough(&out) < rough(&signal));
    }

    #[test]
    fn normalize_zero_mean_unit_std() {
        let out = normalize(&[1.0, 2.0, 3.0, 4.0, 10.0]);
        let (mean, std) = mean_std(&out);
        assert!(mean.abs() < 1e-12);
        assert!((std - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_constant_is_zero() {
        let out = normalize(&[3.3; 8]);
        assert!(out.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn preprocess_has_target_length() {
        let s = series(&[100.0, 200.0, 300.0], &[0.5, 0.8, 0.3]);
        let v = preprocess(&s, 64, &Smoothing::default()).unwrap();
        assert_eq!(v.len(), 64);
        let (mean, std) = mean_std(&v.values);
        assert!(mean.abs() < 1e-9);
        assert!((std - 1.0).abs() < 1e-6);
    }

    #[test]
    fn preprocess_rejects_zero_length() {
        let s = series(&[1.0, 2.0], &[1.0, 2.0]);
        assert_eq!(
            preprocess(&s, 0, &Smoothing::default()),
            Err(PreprocessError::EmptyGrid)
        );
    }
}
