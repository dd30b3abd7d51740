//! Pipeline configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration.  `FRA_MODEL_DIR` and `FRA_PREVIEW_POINTS` override
//! whatever the file says.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::preprocess::Smoothing;
use crate::ml::DEFAULT_MODEL_FILE;

pub const ENV_MODEL_DIR: &str = "FRA_MODEL_DIR";
pub const ENV_PREVIEW_POINTS: &str = "FRA_PREVIEW_POINTS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the classifier artifact.  `None` runs without a model.
    pub model_dir: Option<PathBuf>,
    /// Artifact file name inside `model_dir`.
    pub model_file: String,
    pub smoothing: Smoothing,
    /// Leading parsed points echoed back in every report.
    pub preview_points: usize,
    pub plot: PlotConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            model_file: DEFAULT_MODEL_FILE.to_string(),
            smoothing: Smoothing::default(),
            preview_points: 10,
            plot: PlotConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
    /// Logarithmic frequency axis (falls back to linear for non-positive
    /// frequencies).
    pub log_x: bool,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 675,
            log_x: true,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Apply `FRA_*` environment overrides.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = lookup(ENV_MODEL_DIR).filter(|d| !d.trim().is_empty()) {
            self.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_PREVIEW_POINTS) {
            self.preview_points = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PREVIEW_POINTS}='{raw}' is not a count"))?;
        }
        Ok(self)
    }

    /// Reject settings the preprocessor or renderer cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.smoothing
            .validate()
            .context("invalid smoothing settings")?;
        if self.model_file.trim().is_empty() {
            anyhow::bail!("model_file must not be empty");
        }
        if self.plot.width < 64 || self.plot.height < 64 {
            anyhow::bail!(
                "plot size {}x{} is too small",
                self.plot.width,
                self.plot.height
            );
        }
        Ok(())
    }

    /// Full path of the artifact, when a model directory is configured.
    pub fn model_path(&self) -> Option<PathBuf> {
        self.model_dir.as_ref().map(|dir| dir.join(&self.model_file))
    }
}
