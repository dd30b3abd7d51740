use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueHint};

use fra_lens::data::loader;
use fra_lens::ml::load_model;
use fra_lens::plot::attach_plot;
use fra_lens::{featurize, FileType, JsonLinesSink, Orchestrator, PipelineConfig, ResultSink, Source};

#[derive(Parser)]
#[command(author, version, about = "Classify frequency-response sweeps and explain the result")]
struct Cli {
    /// JSON pipeline configuration
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, preprocess, classify and explain one measurement file
    Analyze {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,

        /// Directory holding the classifier artifact (overrides config/env)
        #[arg(long, value_hint = ValueHint::DirPath)]
        model_dir: Option<PathBuf>,

        /// Force the parser instead of guessing from the extension
        #[arg(long)]
        file_type: Option<FileType>,

        /// Write a PNG plot of the response and saliency
        #[arg(long, value_hint = ValueHint::FilePath)]
        plot: Option<PathBuf>,
    },

    /// Print derivative, peak count and moments of a measurement
    Features {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,

        #[arg(long)]
        file_type: Option<FileType>,
    },

    /// Load a classifier artifact and describe it
    InspectModel {
        #[arg(value_hint = ValueHint::AnyPath)]
        path: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::from_file(p)?,
        None => PipelineConfig::default(),
    };
    let config = config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze {
            file,
            model_dir,
            file_type,
            plot,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if model_dir.is_some() {
                config.model_dir = model_dir;
            }
            let plot_config = config.plot.clone();

            let orchestrator = Orchestrator::new(config);
            let mut report = orchestrator.analyze(&Source::Path(file), file_type);
            if let Some(out) = plot {
                attach_plot(&mut report, &out, &plot_config);
            }

            let stdout = std::io::stdout();
            JsonLinesSink::new(stdout.lock()).record(&report)?;
        }
        Command::Features { file, file_type } => {
            let source = Source::Path(file);
            let parsed = loader::parse(&source, file_type)
                .with_context(|| format!("parsing {}", source.file_name()))?;
            let features = featurize(&parsed.series).context("computing features")?;
            println!("{}", serde_json::to_string_pretty(&features)?);
        }
        Command::InspectModel { path } => {
            let model = load_model(&path)
                .with_context(|| format!("loading model {}", path.display()))?;
            let summary = serde_json::json!({
                "name": model.name(),
                "input_length": model.input_length(),
                "classes": model.class_count(),
                "labels": model.labels(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
