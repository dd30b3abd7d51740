use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ParseError, PreprocessError};

// ---------------------------------------------------------------------------
// FileType – which parser handles a source
// ---------------------------------------------------------------------------

/// Measurement file formats recognised by extension or explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Xml,
    /// Vendor binary dumps (`.bin` / `.dat`). Recognised but not parsed.
    Binary,
}

impl FileType {
    /// Guess the file type from a file name's extension.
    pub fn from_name(name: &str) -> Result<Self, ParseError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        ext.parse()
    }
}

impl FromStr for FileType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "xml" => Ok(FileType::Xml),
            "bin" | "dat" => Ok(FileType::Binary),
            "" => Err(ParseError::Unsupported("missing file extension".into())),
            other => Err(ParseError::Unsupported(format!(".{other}"))),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Csv => write!(f, "csv"),
            FileType::Xml => write!(f, "xml"),
            FileType::Binary => write!(f, "bin"),
        }
    }
}

// ---------------------------------------------------------------------------
// Source – raw bytes or a path handed over by the storage collaborator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Source {
    Path(PathBuf),
    Bytes { file_name: String, data: Vec<u8> },
}

impl Source {
    /// Name used for type detection and reporting.
    pub fn file_name(&self) -> String {
        match self {
            Source::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            Source::Bytes { file_name, .. } => file_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Series – one parsed measurement
// ---------------------------------------------------------------------------

/// Parsed (frequency, magnitude) pairs in source order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    /// Frequency axis (x).
    pub freqs: Vec<f64>,
    /// Magnitude axis (y) – same length as `freqs`.
    pub mags: Vec<f64>,
}

impl Series {
    /// Build a series, checking the paired-length invariant.
    pub fn new(freqs: Vec<f64>, mags: Vec<f64>) -> Result<Self, PreprocessError> {
        if freqs.len() != mags.len() {
            return Err(PreprocessError::LengthMismatch {
                freqs: freqs.len(),
                mags: mags.len(),
            });
        }
        if freqs.is_empty() {
            return Err(PreprocessError::EmptySeries);
        }
        Ok(Series { freqs, mags })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    /// Smallest and largest frequency, `None` when empty.
    pub fn freq_range(&self) -> Option<(f64, f64)> {
        if self.freqs.is_empty() {
            return None;
        }
        let min = self.freqs.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.freqs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }

    /// The first `n` points as `[freq, mag]` pairs, in source order.
    pub fn preview(&self, n: usize) -> Vec<[f64; 2]> {
        self.freqs
            .iter()
            .zip(&self.mags)
            .take(n)
            .map(|(&f, &m)| [f, m])
            .collect()
    }

    /// Copy sorted by ascending frequency with duplicate frequencies collapsed
    /// onto their first occurrence in source order.
    pub fn sorted(&self) -> Series {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.freqs[a].total_cmp(&self.freqs[b]));

        let mut freqs = Vec::with_capacity(order.len());
        let mut mags = Vec::with_capacity(order.len());
        for idx in order {
            let f = self.freqs[idx];
            if freqs.last() == Some(&f) {
                continue;
            }
            freqs.push(f);
            mags.push(self.mags[idx]);
        }
        Series { freqs, mags }
    }
}

// ---------------------------------------------------------------------------
// Parsed – parser output with ingestion-quality counters
// ---------------------------------------------------------------------------

/// A parsed series together with the number of malformed records the parser
/// skipped on the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parsed {
    pub series: Series,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Grid / ProcessedVector
// ---------------------------------------------------------------------------

/// Monotonic target frequency axis sized to the model input.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid(Vec<f64>);

impl Grid {
    /// `len` evenly spaced points over `[start, stop]` inclusive.
    pub fn linspace(start: f64, stop: f64, len: usize) -> Result<Self, PreprocessError> {
        if len == 0 {
            return Err(PreprocessError::EmptyGrid);
        }
        if !start.is_finite() || !stop.is_finite() {
            return Err(PreprocessError::NonFinite("grid bounds"));
        }
        if len == 1 {
            return Ok(Grid(vec![start]));
        }
        let step = (stop - start) / (len - 1) as f64;
        if !step.is_finite() {
            return Err(PreprocessError::NonFinite("grid step"));
        }
        let mut points: Vec<f64> = (0..len).map(|i| start + step * i as f64).collect();
        points[len - 1] = stop;
        Ok(Grid(points))
    }

    /// Grid spanning the series' observed frequency range.
    pub fn spanning(series: &Series, len: usize) -> Result<Self, PreprocessError> {
        let (min, max) = series.freq_range().ok_or(PreprocessError::EmptySeries)?;
        Self::linspace(min, max, len)
    }

    pub fn points(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for Grid {
    fn from(points: Vec<f64>) -> Self {
        Grid(points)
    }
}

/// Model-ready vector: resampled, smoothed and normalised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedVector {
    pub values: Vec<f64>,
}

impl ProcessedVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_extension() {
        assert_eq!(FileType::from_name("run1.CSV").unwrap(), FileType::Csv);
        assert_eq!(FileType::from_name("dump.xml").unwrap(), FileType::Xml);
        assert_eq!(FileType::from_name("raw.dat").unwrap(), FileType::Binary);
        assert!(matches!(
            FileType::from_name("notes.txt"),
            Err(ParseError::Unsupported(_))
        ));
        assert!(FileType::from_name("noext").is_err());
    }

    #[test]
    fn series_rejects_mismatch_and_empty() {
        assert_eq!(
            Series::new(vec![1.0], vec![]),
            Err(PreprocessError::LengthMismatch { freqs: 1, mags: 0 })
        );
        assert_eq!(Series::new(vec![], vec![]), Err(PreprocessError::EmptySeries));
    }

    #[test]
    fn sorted_orders_and_dedups_keeping_first() {
        let s = Series::new(vec![300.0, 100.0, 200.0, 100.0], vec![3.0, 1.0, 2.0, 9.0]).unwrap();
        let sorted = s.sorted();
        assert_eq!(sorted.freqs, vec![100.0, 200.0, 300.0]);
        assert_eq!(sorted.mags, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn preview_is_truncated_in_source_order() {
        let s = Series::new(vec![3.0, 1.0, 2.0], vec![30.0, 10.0, 20.0]).unwrap();
        assert_eq!(s.preview(2), vec![[3.0, 30.0], [1.0, 10.0]]);
        assert_eq!(s.preview(10).len(), 3);
    }

    #[test]
    fn linspace_endpoints() {
        let g = Grid::linspace(10.0, 40.0, 4).unwrap();
        assert_eq!(g.points(), &[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(Grid::linspace(5.0, 9.0, 1).unwrap().points(), &[5.0]);
        assert_eq!(Grid::linspace(0.0, 1.0, 0), Err(PreprocessError::EmptyGrid));
    }

    #[test]
    fn linspace_rejects_overflowing_span() {
        assert_eq!(
            Grid::linspace(-1e308, 1e308, 4),
            Err(PreprocessError::NonFinite("grid step"))
        );
    }
}
