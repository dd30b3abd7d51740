/// Model adapter: a fixed capability contract over trained classifiers.
///
/// The pipeline only ever sees [`ModelHandle`]; any runtime that can report
/// its input length, produce class probabilities and differentiate a class
/// score with respect to its input plugs in through [`ModelArtifact`].
pub mod network;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::data::model::ProcessedVector;
use crate::error::{InferenceError, LoadError, SaliencyError};
use network::{ArtifactFile, Network};

/// Artifact file looked up when a directory is given to [`load_model`].
pub const DEFAULT_MODEL_FILE: &str = "classifier.json";

/// Allowed deviation of a probability vector's sum from 1.
const PROBABILITY_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Capability contract
// ---------------------------------------------------------------------------

/// A loaded, read-only classifier.
///
/// Implementations must be safe to call from several threads at once;
/// runtimes that are not reentrant should lock inside `forward`/`gradient`.
pub trait ModelArtifact: Send + Sync {
    fn name(&self) -> &str {
        "model"
    }

    /// Expected input width, `None` when the artifact declares a dynamic shape.
    fn input_length(&self) -> Option<usize>;

    /// Class names, empty when the artifact carries none.
    fn labels(&self) -> &[String] {
        &[]
    }

    /// Number of output classes, when known without running the model.
    fn class_count(&self) -> Option<usize> {
        None
    }

    /// Class probabilities for one input vector.
    fn forward(&self, input: &[f64]) -> Result<Vec<f64>, InferenceError>;

    /// Raw gradient of the `class_index` score with respect to every input
    /// position.
    fn gradient(&self, input: &[f64], class_index: usize) -> Result<Vec<f64>, SaliencyError>;
}

/// Shared handle to a loaded model.
pub type ModelHandle = Arc<dyn ModelArtifact>;

/// Produces model handles from storage.  Lets the orchestrator be driven by
/// test doubles.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ModelHandle, LoadError>;
}

/// Loads JSON network artifacts via [`load_model`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonModelLoader;

impl ModelLoader for JsonModelLoader {
    fn load(&self, path: &Path) -> Result<ModelHandle, LoadError> {
        load_model(path)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub class_index: usize,
    pub probabilities: Vec<f64>,
    pub label: Option<String>,
}

/// Non-negative per-position attribution, aligned with the input vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Saliency {
    pub class_index: usize,
    pub values: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Load a network artifact from a file, or from [`DEFAULT_MODEL_FILE`] inside
/// a directory.
pub fn load_model(path: &Path) -> Result<ModelHandle, LoadError> {
    let file: PathBuf = if path.is_dir() {
        path.join(DEFAULT_MODEL_FILE)
    } else {
        path.to_path_buf()
    };
    if !file.exists() {
        return Err(LoadError::NotFound(file));
    }

    let bytes = std::fs::read(&file).map_err(|source| LoadError::Io {
        path: file.clone(),
        source,
    })?;
    let artifact: ArtifactFile = serde_json::from_slice(&bytes)?;
    let network = Network::from_artifact(artifact)?;

    log::info!(
        "loaded model '{}' from {} (input length {:?}, {} classes)",
        network.name(),
        file.display(),
        network.input_length(),
        network.classes()
    );
    Ok(Arc::new(network))
}

/// Forward classification.  The predicted index is the argmax of the
/// returned probabilities.
pub fn infer(
    model: &dyn ModelArtifact,
    vector: &ProcessedVector,
) -> Result<ClassificationResult, InferenceError> {
    let probabilities = model.forward(vector.as_slice())?;
    if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(InferenceError::NonFinite);
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(InferenceError::NotADistribution(sum));
    }
    let class_index = argmax(&probabilities).ok_or(InferenceError::EmptyOutput)?;
    let label = model.labels().get(class_index).cloned();

    log::debug!(
        "predicted class {class_index} (p = {:.4})",
        probabilities[class_index]
    );
    Ok(ClassificationResult {
        class_index,
        probabilities,
        label,
    })
}

/// Absolute input gradient of the chosen class score.  With no class given,
/// explains the model's own top prediction.
pub fn explain(
    model: &dyn ModelArtifact,
    vector: &ProcessedVector,
    class_index: Option<usize>,
) -> Result<Saliency, SaliencyError> {
    let class_index = match class_index {
        Some(idx) => idx,
        None => infer(model, vector)?.class_index,
    };
    let raw = model.gradient(vector.as_slice(), class_index)?;
    if raw.len() != vector.len() {
        return Err(SaliencyError::LengthMismatch {
            expected: vector.len(),
            actual: raw.len(),
        });
    }
    Ok(Saliency {
        class_index,
        values: raw.iter().map(|g| g.abs()).collect(),
    })
}

/// Index of the largest value; ties go to the first.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
