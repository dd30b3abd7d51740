//! Frequency-response analysis pipeline.
//!
//! Parses vendor CSV/XML sweeps, resamples them onto a trained classifier's
//! input grid, classifies them and attributes the prediction back to
//! individual frequencies.

pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod ml;
pub mod plot;
pub mod sink;
pub mod state;

pub use config::PipelineConfig;
pub use data::features::{featurize, Features};
pub use data::loader::parse;
pub use data::model::{FileType, Grid, Parsed, ProcessedVector, Series, Source};
pub use data::preprocess::{preprocess, Smoothing};
pub use error::{InferenceError, LoadError, ParseError, PipelineError, PreprocessError, SaliencyError};
pub use ml::{explain, infer, load_model, ClassificationResult, ModelArtifact, ModelHandle, Saliency};
pub use sink::{JsonLinesSink, ResultSink};
pub use state::{AnalysisReport, ModelStatus, Orchestrator};
