use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Malformed or unsupported measurement file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV needs at least two columns, found {0}")]
    TooFewColumns(usize),

    #[error("frequency column '{0}' has no magnitude/response/amplitude companion")]
    MissingMagnitudeColumn(String),

    #[error("row {row}, column '{column}': '{value}' is not a number")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },

    #[error("XML is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("file contains no measurement points")]
    Empty,
}

// ---------------------------------------------------------------------------
// Model artifact
// ---------------------------------------------------------------------------

/// Model artifact missing or incompatible.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no model directory configured")]
    NotConfigured,

    #[error("model artifact not found at {0}")]
    NotFound(PathBuf),

    #[error("I/O error reading model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model artifact is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error("incompatible model: {0}")]
    Incompatible(String),
}

// ---------------------------------------------------------------------------
// Numerics
// ---------------------------------------------------------------------------

/// Numerically degenerate input to the preprocessor.
#[derive(Error, Debug, PartialEq)]
pub enum PreprocessError {
    #[error("series is empty")]
    EmptySeries,

    #[error("target grid has zero length")]
    EmptyGrid,

    #[error("frequencies ({freqs}) and magnitudes ({mags}) differ in length")]
    LengthMismatch { freqs: usize, mags: usize },

    #[error("smoothing window {window} must be odd and exceed polynomial order {poly_order}")]
    InvalidWindow { window: usize, poly_order: usize },

    #[error("derivative needs at least two distinct frequencies, found {0}")]
    TooShortForDerivative(usize),

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

/// Forward-pass failure.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("input has {actual} points but the model expects {expected}")]
    InputLength { expected: usize, actual: usize },

    #[error("input vector is empty")]
    EmptyInput,

    #[error("shape error in layer {layer}: {reason}")]
    Shape { layer: usize, reason: String },

    #[error("model produced a non-finite or negative output")]
    NonFinite,

    #[error("model output sums to {0}, not 1")]
    NotADistribution(f64),

    #[error("model produced no classes")]
    EmptyOutput,
}

/// Input-gradient failure. Never fatal to a classification.
#[derive(Error, Debug)]
pub enum SaliencyError {
    #[error("class index {index} out of range for {classes} classes")]
    ClassOutOfRange { index: usize, classes: usize },

    #[error("gradient has {actual} entries, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("forward pass failed while computing saliency: {0}")]
    Forward(#[from] InferenceError),

    #[error("model does not support gradients: {0}")]
    Unsupported(String),
}

/// Umbrella error for callers driving the pipeline stage by stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Saliency(#[from] SaliencyError),
}
