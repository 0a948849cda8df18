use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use spectral_stacking::config::{Config, CONFIG_COPY};
use spectral_stacking::pipeline::{Pipeline, NORM_FACTORS_FILE};
use spectral_stacking::stack::StackedBin;
use spectral_stacking::StackingError;
use tempfile::TempDir;

/// A flat spectrum at `level` sampled every Angstrom over `[start, end]`.
fn flat(id: &str, start: f64, end: f64, level: f64, z: f64) -> Value {
    let n = (end - start) as usize + 1;
    let wavelength: Vec<f64> = (0..n).map(|i| start + i as f64).collect();
    json!({
        "specid": id,
        "wavelength": wavelength,
        "flux": vec![level; n],
        "ivar": vec![4.0; n],
        "z": z,
    })
}

fn write_inputs(dir: &Path, spectra: Vec<Value>) -> PathBuf {
    let path = dir.join("spectra.json");
    std::fs::write(&path, serde_json::to_vec(&Value::Array(spectra)).unwrap()).unwrap();
    path
}

fn config(input: &Path, output: &Path, extra: &str) -> Config {
    let text = format!(
        r#"
        [general]
        output_directory = {output:?}
        logging_level = "debug"

        [reader]
        input = [{input:?}]

        [rebin]
        min_wavelength = 1010.0
        max_wavelength = 1090.0
        step = 2.0
        step_type = "lin"
        {extra}
        "#,
        output = output.display().to_string(),
        input = input.display().to_string(),
    );
    Config::from_toml_str(&text).unwrap()
}

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_inputs(
        tmp.path(),
        vec![
            flat("a", 1000.0, 1100.0, 2.0, 2.1),
            flat("b", 1000.0, 1100.0, 5.0, 2.4),
            flat("c", 1005.0, 1095.0, 0.5, 2.9),
            // nothing inside the reference window
            flat("red", 5000.0, 5100.0, 1.0, 2.2),
            json!({"specid": "short", "wavelength": [1.0, 2.0], "flux": [1.0], "ivar": [1.0, 1.0]}),
        ],
    );
    let output = tmp.path().join("run");
    (tmp, input, output)
}

const WINDOW: &str = r#"
        [normalizer]
        type = "window"
        window = [1040.0, 1060.0]
"#;

#[test]
fn normalized_run_writes_stack_factors_and_config_copy() {
    let (_tmp, input, output) = setup();
    let summary = Pipeline::new(config(&input, &output, WINDOW), false)
        .run()
        .unwrap();

    let provenance = &summary.report.provenance;
    assert_eq!(provenance.num_input, 5);
    assert_eq!(provenance.num_stacked, 3);
    assert_eq!(provenance.num_skipped, 2);
    let mut skipped: Vec<&str> = provenance.skipped.iter().map(|s| s.spectrum.as_str()).collect();
    skipped.sort();
    assert_eq!(skipped, vec!["red", "short"]);

    let stack = &summary.report.stack;
    assert_eq!(stack.bins.len(), 41);
    for bin in &stack.bins {
        assert_eq!(bin.count, 3);
        assert!((bin.flux.unwrap() - 1.0).abs() < 1e-9, "{bin:?}");
    }

    let main = output.join("stack").join("stack.json");
    assert_eq!(summary.outputs, vec![main.clone()]);
    let written: Value = serde_json::from_slice(&std::fs::read(&main).unwrap()).unwrap();
    let bins: Vec<StackedBin> = serde_json::from_value(written["stack"]["bins"].clone()).unwrap();
    assert_eq!(bins.len(), stack.bins.len());
    for (read, kept) in bins.iter().zip(&stack.bins) {
        assert_eq!(read.wavelength, kept.wavelength);
        assert_eq!(read.count, kept.count);
        assert!((read.flux.unwrap() - kept.flux.unwrap()).abs() < 1e-12);
    }
    assert_eq!(written["provenance"]["normalizer"]["type"], "window");

    let factors = std::fs::read_to_string(output.join("log").join(NORM_FACTORS_FILE)).unwrap();
    assert_eq!(factors.lines().count(), 1 + 4);
    assert!(factors.lines().any(|l| l.starts_with("b,5.0,")));

    let copy = Config::load(&output.join(CONFIG_COPY)).unwrap();
    assert_eq!(copy.normalizer, config(&input, &output, WINDOW).normalizer);
}

#[test]
fn second_run_needs_overwrite() {
    let (_tmp, input, output) = setup();
    let cfg = config(&input, &output, "");
    Pipeline::new(cfg.clone(), false).run().unwrap();

    let err = Pipeline::new(cfg.clone(), false).run().unwrap_err();
    assert!(matches!(err, StackingError::Config(_)), "{err}");

    Pipeline::new(cfg, true).run().unwrap();
}

#[test]
fn unnormalized_weighted_mean_follows_the_weights() {
    let (_tmp, input, output) = setup();
    let summary = Pipeline::new(config(&input, &output, ""), false)
        .run()
        .unwrap();
    // equal weights: plain average of 2, 5 and 0.5
    let expected = (2.0 + 5.0 + 0.5) / 3.0;
    for bin in &summary.report.stack.bins {
        assert!((bin.flux.unwrap() - expected).abs() < 1e-9);
    }
    assert!(!output.join("log").join(NORM_FACTORS_FILE).exists());
}

#[test]
fn nothing_on_grid_without_rebinning_is_an_empty_stack() {
    let (_tmp, input, output) = setup();
    let mut cfg = config(&input, &output, "");
    cfg.rebin.rebin = false;
    let err = Pipeline::new(cfg, false).run().unwrap_err();
    assert!(matches!(err, StackingError::EmptyStack { spectra: 5 }), "{err}");
}

#[test]
fn csv_output_with_split_groups_and_bootstrap() {
    let (_tmp, input, output) = setup();
    let extra = r#"
        [stacker]
        type = "median"
        num_bootstrap = 25

        [stacker.split]
        on = ["z"]
        intervals = [[2.0, 2.5, 3.0, 3.5]]

        [writer]
        output_file = "median.csv"
    "#;
    let summary = Pipeline::new(config(&input, &output, extra), false)
        .run()
        .unwrap();

    let groups = &summary.report.groups;
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].num_spectra, 2);
    assert_eq!(groups[1].num_spectra, 1);
    assert!(groups[2].stack.is_none());
    assert!(summary
        .report
        .stack
        .bins
        .iter()
        .all(|b| b.bootstrap_error.is_some()));

    let stack_dir = output.join("stack");
    let mut names: Vec<String> = std::fs::read_dir(&stack_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "median.csv",
            "median.provenance.json",
            "median_group0.csv",
            "median_group1.csv"
        ]
    );

    let mut rdr = csv::Reader::from_path(stack_dir.join("median_group1.csv")).unwrap();
    let bins: Vec<StackedBin> = rdr.deserialize().map(|r| r.unwrap()).collect();
    assert!(bins.iter().all(|b| b.flux == Some(0.5) && b.count == 1));
}
