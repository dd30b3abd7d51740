use std::path::Path;

use fra_lens::data::preprocess::{normalize, resample_to_grid};
use fra_lens::ml::DEFAULT_MODEL_FILE;
use fra_lens::{
    explain, infer, load_model, parse, preprocess, FileType, Grid, ModelStatus, Orchestrator,
    PipelineConfig, Smoothing, Source,
};

const MODEL_JSON: &str = r#"{
    "name": "four_point_classifier",
    "input_shape": [null, 4, 1],
    "labels": ["healthy", "axial_shift", "short"],
    "layers": [
        {
            "type": "conv1d",
            "kernel": [[[0.4, -0.3]], [[0.9, 0.5]], [[-0.2, 0.7]]],
            "bias": [0.05, -0.02],
            "activation": "relu"
        },
        { "type": "max_pool1d", "size": 2 },
        { "type": "global_average_pool1d" },
        {
            "type": "dense",
            "weights": [[1.0, -0.5, 0.2], [-0.4, 0.8, 0.3]],
            "bias": [0.0, 0.1, -0.1],
            "activation": "softmax"
        }
    ]
}"#;

fn write_model(dir: &Path) {
    std::fs::write(dir.join(DEFAULT_MODEL_FILE), MODEL_JSON).unwrap();
}

fn bytes(name: &str, data: &str) -> Source {
    Source::Bytes {
        file_name: name.to_string(),
        data: data.as_bytes().to_vec(),
    }
}

#[test]
fn scenario_a_csv() {
    let parsed = parse(&bytes("a.csv", "freq,mag\n100,0.5\n200,0.8\n300,0.3\n"), None).unwrap();
    assert_eq!(parsed.series.freqs, vec![100.0, 200.0, 300.0]);
    assert_eq!(parsed.series.mags, vec![0.5, 0.8, 0.3]);
}

#[test]
fn scenario_b_xml_skips_incomplete_points() {
    let xml = r#"<data><point freq="50" mag="1.0"/><point freq="150" mag="2.0"/><point freq="250"/></data>"#;
    let parsed = parse(&bytes("b.xml", xml), None).unwrap();
    assert_eq!(parsed.series.freqs, vec![50.0, 150.0]);
    assert_eq!(parsed.series.mags, vec![1.0, 2.0]);
    assert_eq!(parsed.skipped, 1);
}

#[test]
fn scenario_c_no_model() {
    let orchestrator = Orchestrator::new(PipelineConfig::default());
    let report = orchestrator.analyze(&bytes("c.csv", "freq,mag\n1,2\n3,4\n"), None);
    assert!(!report.model_loaded);
    assert!(report.prediction.is_none());
    assert!(report.label.is_none());
    assert!(report.probabilities.is_none());
    assert!(report.saliency.is_none());
    assert!(report.notes.iter().any(|n| n.starts_with("Model not loaded")));
    assert_eq!(report.preview_points, vec![[1.0, 2.0], [3.0, 4.0]]);
}

#[test]
fn scenario_d_grid_aligned_series() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path());
    let model = load_model(dir.path()).unwrap();
    assert_eq!(model.input_length(), Some(4));

    let parsed = parse(
        &bytes("d.csv", "freq,mag\n10,0.2\n20,0.9\n30,0.4\n40,0.6\n"),
        None,
    )
    .unwrap();
    let series = parsed.series;

    let grid = Grid::spanning(&series, 4).unwrap();
    assert_eq!(resample_to_grid(&series, &grid).unwrap(), series.mags);

    // Four points never fill the default smoothing window.
    let vector = preprocess(&series, 4, &Smoothing::default()).unwrap();
    assert_eq!(vector.values, normalize(&series.mags));

    let result = infer(model.as_ref(), &vector).unwrap();
    assert_eq!(result.probabilities.len(), 3);
    assert!((result.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);

    let saliency = explain(model.as_ref(), &vector, None).unwrap();
    assert_eq!(saliency.class_index, result.class_index);
    assert_eq!(saliency.values.len(), 4);
    assert!(saliency.values.iter().all(|v| *v >= 0.0));
}

#[test]
fn orchestrator_end_to_end_with_model_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path());
    let csv = dir.path().join("sweep.csv");
    std::fs::write(&csv, "Frequency,Amplitude\n40,0.6\n10,0.2\n30,0.4\n20,0.9\n").unwrap();

    let config = PipelineConfig {
        model_dir: Some(dir.path().to_path_buf()),
        preview_points: 2,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(config);
    let report = orchestrator.analyze(&Source::Path(csv), None);

    assert!(report.model_loaded, "notes: {:?}", report.notes);
    assert!(report.notes.is_empty(), "notes: {:?}", report.notes);
    assert_eq!(report.preview_points, vec![[40.0, 0.6], [10.0, 0.2]]);
    assert_eq!(report.grid.as_deref(), Some(&[10.0, 20.0, 30.0, 40.0][..]));
    let probabilities = report.probabilities.unwrap();
    assert_eq!(report.prediction, fra_lens::ml::argmax(&probabilities));
    assert_eq!(report.saliency.unwrap().len(), 4);
    assert!(report.label.is_some());
    assert!(matches!(orchestrator.status(), ModelStatus::Loaded { .. }));
}

#[test]
fn broken_artifact_enters_load_failed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(DEFAULT_MODEL_FILE),
        r#"{"input_shape": [null, 4, 1], "layers": []}"#,
    )
    .unwrap();
    let orchestrator = Orchestrator::new(PipelineConfig {
        model_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    });

    let report = orchestrator.analyze(&bytes("x.xml", r#"<d><point freq="1" mag="1"/></d>"#), None);
    assert!(!report.model_loaded);
    assert!(report.notes.iter().any(|n| n.starts_with("Model failed to load")));

    // Fixing the artifact only takes effect after an explicit reload.
    write_model(dir.path());
    let report = orchestrator.analyze(&bytes("x.csv", "freq,mag\n1,1\n2,2\n"), None);
    assert!(!report.model_loaded);
    assert!(orchestrator.reload().is_ok());
    let report = orchestrator.analyze(&bytes("x.csv", "freq,mag\n1,1\n2,2\n"), None);
    assert!(report.prediction.is_some());
}

#[test]
fn explicit_file_type_override() {
    let orchestrator = Orchestrator::new(PipelineConfig::default());
    let source = bytes("upload.bin", "freq,mag\n1,1\n");
    let report = orchestrator.analyze(&source, None);
    assert!(report.notes[0].starts_with("Failed to parse file"));
    let report = orchestrator.analyze(&source, Some(FileType::Csv));
    assert_eq!(report.preview_points, vec![[1.0, 1.0]]);
}
