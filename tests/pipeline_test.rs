//! End-to-end tests: session files on disk to exported firmware parameters.

use posture_pipeline::config::DEFAULT_CHANNELS;
use posture_pipeline::core::{FitError, LoadError, Normalization};
use posture_pipeline::{
    extractor_for, Dataset, DatasetAssembler, ParameterExporter, PipelineConfig, SessionLoader,
};
use std::fmt::Write as _;
use std::path::Path;

/// Write a raw session in the device's format. `offset` shifts the angle
/// channels so the two classes are separable; `fsr_balance` stays constant.
fn write_session(dir: &Path, name: &str, label: u8, samples: usize, offset: f64) {
    write_session_with(dir, name, &DEFAULT_CHANNELS, label, samples, offset);
}

fn write_session_with(
    dir: &Path,
    name: &str,
    channels: &[&str],
    label: u8,
    samples: usize,
    offset: f64,
) {
    let mut out = format!("t_ms,{},label\n", channels.join(","));
    for i in 0..samples {
        let _ = write!(out, "{}", i * 20);
        for (j, channel) in channels.iter().enumerate() {
            let value = if *channel == "fsr_balance" {
                0.5
            } else {
                offset + j as f64 + ((i * 7 + j * 3) % 11) as f64 * 0.1
            };
            let _ = write!(out, ",{value}");
        }
        let _ = writeln!(out, ",{label}");
    }
    std::fs::write(dir.join(name), out).unwrap();
}

fn labeled_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path(), "good_b.csv", 1, 150, 10.0);
    write_session(dir.path(), "good_a.csv", 1, 150, 10.0);
    write_session(dir.path(), "bad_a.csv", 0, 150, 0.0);
    write_session(dir.path(), "bad_b.csv", 0, 150, 0.0);
    // Not a labeled session; must be ignored
    write_session(dir.path(), "session_20240101_000000.csv", 1, 150, 5.0);
    dir
}

fn build(dir: &Path, config: &PipelineConfig) -> Dataset {
    let sessions = SessionLoader::new(config.label_groups.clone())
        .load_dir(dir)
        .unwrap();
    DatasetAssembler::new(extractor_for(config))
        .assemble(&sessions)
        .unwrap()
}

#[test]
fn test_end_to_end_export() {
    let dir = labeled_dir();
    let config = PipelineConfig::default();

    let dataset = build(dir.path(), &config);

    // (150 - 50) / 25 + 1 = 5 windows per session, four sessions
    assert_eq!(dataset.len(), 20);
    assert_eq!(dataset.feature_count(), 36);

    let sources: Vec<&str> = dataset
        .rows()
        .iter()
        .map(|r| r.source_name.as_str())
        .collect();
    assert_eq!(sources[0], "good_a.csv");
    assert_eq!(sources[5], "good_b.csv");
    assert_eq!(sources[10], "bad_a.csv");
    assert_eq!(sources[19], "bad_b.csv");
    let ids: Vec<usize> = dataset.rows().iter().map(|r| r.session_id).collect();
    assert_eq!(ids[0], 0);
    assert_eq!(ids[19], 3);

    let dataset_path = dir.path().join("windows_dataset.csv");
    dataset.write_csv(&dataset_path).unwrap();
    let header = std::fs::read_to_string(&dataset_path).unwrap();
    let header = header.lines().next().unwrap();
    assert!(header.starts_with("pitch1_mean,pitch1_std,pitch1_min,pitch1_max,roll1_mean"));
    assert!(header.ends_with("fsr_balance_max,label,session_id,source_file"));

    let reloaded = Dataset::read_csv(&dataset_path).unwrap();
    assert_eq!(reloaded.feature_names(), dataset.feature_names());
    assert_eq!(reloaded.len(), dataset.len());

    let model = ParameterExporter::default().export(&reloaded).unwrap();
    assert_eq!(model.feature_names, dataset.feature_names());
    assert_eq!(model.weights.len(), 36);
    assert_eq!(model.mean.len(), 36);
    assert_eq!(model.std.len(), 36);
    assert_eq!(model.accuracy(&reloaded), 1.0);

    // fsr_balance is constant, so its mean and max columns have zero spread
    let balance_mean = dataset
        .feature_names()
        .iter()
        .position(|n| n == "fsr_balance_mean")
        .unwrap();
    assert_eq!(model.std[balance_mean], 1.0);
    assert!((model.mean[balance_mean] - 0.5).abs() < 1e-12);

    let manifest: Vec<String> = model
        .render_manifest()
        .lines()
        .map(|l| l.split_once("] ").unwrap().1.to_string())
        .collect();
    assert_eq!(manifest, dataset.feature_names());

    let source = model.render_source();
    for array in ["LR_WEIGHTS", "LR_MEAN", "LR_STD"] {
        assert!(source.contains(&format!("const float {array}[LR_NUM_FEATURES] = {{")));
    }
    assert!(source.contains("const float LR_BIAS = "));
    // Three arrays of 36 values at four per line
    let value_lines = source.lines().filter(|l| l.starts_with("    ")).count();
    assert_eq!(value_lines, 27);
    assert!(model
        .render_header()
        .contains("constexpr int LR_NUM_FEATURES = 36;"));
}

#[test]
fn test_normalization_standardizes_columns() {
    let dir = labeled_dir();
    let dataset = build(dir.path(), &PipelineConfig::default());

    let norm = Normalization::fit(&dataset);
    let scaled: Vec<Vec<f64>> = dataset
        .rows()
        .iter()
        .map(|r| norm.apply(&r.values))
        .collect();

    let n = scaled.len() as f64;
    for idx in 0..dataset.feature_count() {
        let column: Vec<f64> = scaled.iter().map(|row| row[idx]).collect();
        let mean = column.iter().sum::<f64>() / n;
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9, "{}: mean {mean}", dataset.feature_names()[idx]);
        if column.iter().all(|v| *v == 0.0) {
            continue;
        }
        assert!((var.sqrt() - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_predictions_match_firmware_formula() {
    let dir = labeled_dir();
    let dataset = build(dir.path(), &PipelineConfig::default());
    let model = ParameterExporter::default().export(&dataset).unwrap();

    let row = &dataset.rows()[0];
    let z = model.bias
        + (0..model.feature_count())
            .map(|i| model.weights[i] * (row.values[i] - model.mean[i]) / model.std[i])
            .sum::<f64>();
    let expected = 1.0 / (1.0 + (-z).exp());
    assert!((model.predict_proba(&row.values) - expected).abs() < 1e-12);
}

#[test]
fn test_schema_mismatch_yields_no_dataset() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path(), "good_1.csv", 1, 150, 10.0);
    write_session_with(
        dir.path(),
        "bad_1.csv",
        &DEFAULT_CHANNELS[..8],
        0,
        150,
        0.0,
    );

    let config = PipelineConfig::default();
    let sessions = SessionLoader::new(config.label_groups.clone())
        .load_dir(dir.path())
        .unwrap();
    let err = DatasetAssembler::new(extractor_for(&config))
        .assemble(&sessions)
        .unwrap_err();
    assert_eq!(err.source_name, "bad_1.csv");
}

#[test]
fn test_single_class_cannot_export() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path(), "good_1.csv", 1, 150, 10.0);
    write_session(dir.path(), "good_2.csv", 1, 120, 10.0);

    let dataset = build(dir.path(), &PipelineConfig::default());
    assert!(!dataset.is_empty());

    let err = ParameterExporter::default().export(&dataset).unwrap_err();
    assert!(matches!(err, FitError::SingleClass(ref classes) if classes == &[1]));
}

#[test]
fn test_short_session_contributes_no_windows() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path(), "good_1.csv", 1, 40, 10.0);
    write_session(dir.path(), "bad_1.csv", 0, 100, 0.0);

    let dataset = build(dir.path(), &PipelineConfig::default());
    assert_eq!(dataset.len(), 3);
    assert!(dataset.rows().iter().all(|r| r.source_name == "bad_1.csv"));
}

#[test]
fn test_window_geometry_from_config() {
    let dir = labeled_dir();
    let config = PipelineConfig {
        window_size: 100,
        step_size: 50,
        ..PipelineConfig::default()
    };

    let dataset = build(dir.path(), &config);
    assert_eq!(dataset.len(), 8);
}

#[test]
fn test_missing_sessions_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = SessionLoader::new(PipelineConfig::default().label_groups)
        .load_dir(dir.path())
        .unwrap_err();
    assert!(matches!(err, LoadError::NoSessions { .. }));
    assert!(err.to_string().contains("good_*.csv"));
}
