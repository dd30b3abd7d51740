use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::data::loader;
use crate::data::model::{FileType, Grid, ProcessedVector, Series, Source};
use crate::data::preprocess::preprocess_on_grid;
use crate::error::{LoadError, PipelineError};
use crate::ml::{self, ClassificationResult, JsonModelLoader, ModelHandle, ModelLoader, Saliency};

pub const NOTE_MODEL_NOT_LOADED: &str =
    "Model not loaded. Place the classifier artifact in the configured model directory.";

// ---------------------------------------------------------------------------
// Model state
// ---------------------------------------------------------------------------

/// Lifecycle of the process-wide model.
///
/// `NoModel` → `Loaded` on a successful load; a failed load parks in
/// `LoadFailed` until [`Orchestrator::reload`] is called.
#[derive(Clone)]
pub enum ModelState {
    NoModel,
    Loaded(ModelHandle),
    LoadFailed(String),
}

/// Serializable summary of [`ModelState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    NoModel,
    Loaded { name: String, input_length: Option<usize> },
    LoadFailed { reason: String },
}

impl From<&ModelState> for ModelStatus {
    fn from(state: &ModelState) -> Self {
        match state {
            ModelState::NoModel => ModelStatus::NoModel,
            ModelState::Loaded(model) => ModelStatus::Loaded {
                name: model.name().to_string(),
                input_length: model.input_length(),
            },
            ModelState::LoadFailed(reason) => ModelStatus::LoadFailed {
                reason: reason.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Report handed to the result sink
// ---------------------------------------------------------------------------

/// Everything one request produced.  Failures show up as `notes`, never as
/// an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub file_name: String,
    pub model_loaded: bool,
    pub preview_points: Vec<[f64; 2]>,
    pub skipped_records: usize,
    pub prediction: Option<usize>,
    pub label: Option<String>,
    pub probabilities: Option<Vec<f64>>,
    pub saliency: Option<Vec<f64>>,
    /// Frequencies the processed vector and saliency are aligned with.
    pub grid: Option<Vec<f64>>,
    pub plot_path: Option<PathBuf>,
    pub notes: Vec<String>,
    /// Parsed series, kept for rendering.
    #[serde(skip)]
    pub series: Option<Series>,
}

impl AnalysisReport {
    pub(crate) fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        log::debug!("{}: {note}", self.file_name);
        self.notes.push(note);
    }
}

/// Output of the primary (classification) stage.
struct Classified {
    grid: Grid,
    vector: ProcessedVector,
    result: ClassificationResult,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs parse → preprocess → classify → explain for one source at a time and
/// owns the lazily loaded model.
pub struct Orchestrator {
    config: PipelineConfig,
    loader: Box<dyn ModelLoader>,
    model: Mutex<ModelState>,
}

impl Orchestrator {
    /// Orchestrator that loads JSON artifacts from `config.model_dir` on first
    /// use.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_loader(config, Box::new(JsonModelLoader))
    }

    pub fn with_loader(config: PipelineConfig, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            model: Mutex::new(ModelState::NoModel),
        }
    }

    /// Orchestrator around an already loaded model.
    pub fn with_model(config: PipelineConfig, model: ModelHandle) -> Self {
        let orchestrator = Self::new(config);
        *orchestrator.lock_model() = ModelState::Loaded(model);
        orchestrator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus::from(&*self.lock_model())
    }

    fn lock_model(&self) -> MutexGuard<'_, ModelState> {
        // Every write replaces the whole state, so a poisoned lock still
        // holds a coherent value.
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, attempting the one-shot load if nothing was tried yet.
    pub fn ensure_loaded(&self) -> ModelState {
        let mut state = self.lock_model();
        if matches!(*state, ModelState::NoModel) {
            if let Some(path) = self.config.model_path() {
                *state = self.attempt_load(&path);
            }
        }
        state.clone()
    }

    /// Drop the current model and try loading again.
    pub fn reload(&self) -> Result<ModelStatus, LoadError> {
        let mut state = self.lock_model();
        let Some(path) = self.config.model_path() else {
            *state = ModelState::NoModel;
            return Err(LoadError::NotConfigured);
        };
        match self.loader.load(&path) {
            Ok(model) => {
                log::info!("reloaded model from {}", path.display());
                *state = ModelState::Loaded(model);
                Ok(ModelStatus::from(&*state))
            }
            Err(e) => {
                log::warn!("model reload from {} failed: {e}", path.display());
                *state = ModelState::LoadFailed(e.to_string());
                Err(e)
            }
        }
    }

    fn attempt_load(&self, path: &std::path::Path) -> ModelState {
        match self.loader.load(path) {
            Ok(model) => ModelState::Loaded(model),
            Err(e) => {
                log::warn!("model load from {} failed, not retrying: {e}", path.display());
                ModelState::LoadFailed(e.to_string())
            }
        }
    }

    /// Analyse one measurement.  Never fails: every problem becomes a note.
    pub fn analyze(&self, source: &Source, file_type: Option<FileType>) -> AnalysisReport {
        let state = self.ensure_loaded();
        let mut report = AnalysisReport {
            file_name: source.file_name(),
            model_loaded: matches!(state, ModelState::Loaded(_)),
            ..Default::default()
        };

        let parsed = match loader::parse(source, file_type) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::error!("failed to parse {}: {e}", report.file_name);
                report.note(format!("Failed to parse file: {e}"));
                return report;
            }
        };
        report.preview_points = parsed.series.preview(self.config.preview_points);
        report.skipped_records = parsed.skipped;
        if parsed.skipped > 0 {
            report.note(format!(
                "Skipped {} malformed record(s) while parsing.",
                parsed.skipped
            ));
        }

        match &state {
            ModelState::NoModel => report.note(NOTE_MODEL_NOT_LOADED),
            ModelState::LoadFailed(reason) => {
                report.note(format!("Model failed to load: {reason}"))
            }
            ModelState::Loaded(model) => self.run_model(model, &parsed.series, &mut report),
        }

        report.series = Some(parsed.series);
        log::info!(
            "analyzed {}: prediction {:?}, {} note(s)",
            report.file_name,
            report.prediction,
            report.notes.len()
        );
        report
    }

    /// Primary stage short-circuits the request on failure; the secondary
    /// saliency stage only degrades it.
    fn run_model(&self, model: &ModelHandle, series: &Series, report: &mut AnalysisReport) {
        let Some(input_length) = model.input_length() else {
            report.note("Model input length is dynamic; inference skipped.");
            return;
        };

        let classified = match guarded(|| self.classify(model, series, input_length)) {
            Ok(c) => c,
            Err(reason) => {
                log::error!("inference failed for {}: {reason}", report.file_name);
                report.note(format!("Inference failed: {reason}"));
                return;
            }
        };

        let class_index = classified.result.class_index;
        report.prediction = Some(class_index);
        report.label = classified.result.label;
        report.probabilities = Some(classified.result.probabilities);
        report.grid = Some(classified.grid.points().to_vec());

        match guarded(|| self.saliency(model, &classified.vector, class_index)) {
            Ok(saliency) => report.saliency = Some(saliency.values),
            Err(reason) => {
                log::warn!("saliency unavailable for {}: {reason}", report.file_name);
                report.note(format!("Saliency unavailable: {reason}"));
            }
        }
    }

    fn classify(
        &self,
        model: &ModelHandle,
        series: &Series,
        input_length: usize,
    ) -> Result<Classified, PipelineError> {
        let sorted = series.sorted();
        let grid = Grid::spanning(&sorted, input_length)?;
        let vector = preprocess_on_grid(&sorted, &grid, &self.config.smoothing)?;
        let result = ml::infer(model.as_ref(), &vector)?;
        Ok(Classified {
            grid,
            vector,
            result,
        })
    }

    fn saliency(
        &self,
        model: &ModelHandle,
        vector: &ProcessedVector,
        class_index: usize,
    ) -> Result<Saliency, PipelineError> {
        Ok(ml::explain(model.as_ref(), vector, Some(class_index))?)
    }
}

/// Run a stage, turning both its error and any panic from the model runtime
/// into a message.
fn guarded<T>(stage: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(stage)) {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "model runtime panicked".to_string())),
    }
}
