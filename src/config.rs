//! Run configuration, read from a TOML file with one table per pipeline stage.
//!
//! ```toml
//! [general]
//! output_directory = "$SCRATCH/stacks/run1"
//!
//! [reader]
//! input = ["spectra.parquet"]
//!
//! [normalizer]
//! type = "window"
//! window = [1420.0, 1500.0]
//!
//! [rebin]
//! min_wavelength = 1000.0
//! max_wavelength = 2000.0
//! step = 1.0
//! step_type = "lin"
//!
//! [stacker]
//! type = "weighted_mean"
//!
//! [writer]
//! output_file = "stack.parquet"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::data::filter::SplitConfig;
use crate::data::loader::ColumnNames;
use crate::error::{Result, StackingError};
use crate::grid::{Grid, StepType};
use crate::normalize::Statistic;
use crate::stack::{Bootstrap, CombinationRule, Stacker};
use crate::writer::OutputFormat;

/// Name of the config copy kept in the output directory.
pub const CONFIG_COPY: &str = ".config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub general: GeneralConfig,
    pub reader: ReaderConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    pub rebin: RebinConfig,
    #[serde(default)]
    pub stacker: StackerConfig,
    #[serde(default)]
    pub writer: WriterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    pub output_directory: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_logging_level")]
    pub logging_level: String,
    /// 0 lets rayon pick.
    #[serde(default)]
    pub num_processors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    pub input: Vec<PathBuf>,
    #[serde(default = "default_wavelength_column")]
    pub wavelength_column: String,
    #[serde(default = "default_flux_column")]
    pub flux_column: String,
    #[serde(default = "default_ivar_column")]
    pub ivar_column: String,
    #[serde(default = "default_error_column")]
    pub error_column: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

impl ReaderConfig {
    pub fn columns(&self) -> ColumnNames {
        ColumnNames {
            wavelength: self.wavelength_column.clone(),
            flux: self.flux_column.clone(),
            ivar: self.ivar_column.clone(),
            error: self.error_column.clone(),
            id: self.id_column.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum NormalizerConfig {
    #[default]
    None,
    Window {
        window: [f64; 2],
        #[serde(default)]
        statistic: Statistic,
        #[serde(default = "default_target")]
        target: f64,
    },
    MultipleRegions {
        #[serde(default = "default_intervals")]
        intervals: Vec<[f64; 2]>,
        #[serde(default = "default_main_interval")]
        main_interval: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RebinConfig {
    pub min_wavelength: f64,
    pub max_wavelength: f64,
    pub step: f64,
    pub step_type: StepType,
    /// When false the inputs must already sit on the grid.
    #[serde(default = "default_true")]
    pub rebin: bool,
}

impl RebinConfig {
    pub fn grid(&self) -> Result<Grid> {
        Grid::new(
            self.min_wavelength,
            self.max_wavelength,
            self.step,
            self.step_type,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackerConfig {
    #[serde(rename = "type", default)]
    pub rule: CombinationRule,
    #[serde(default)]
    pub num_bootstrap: usize,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    #[serde(default)]
    pub keep_realizations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitConfig>,
}

impl Default for StackerConfig {
    fn default() -> Self {
        StackerConfig {
            rule: CombinationRule::default(),
            num_bootstrap: 0,
            random_seed: default_seed(),
            keep_realizations: false,
            split: None,
        }
    }
}

impl StackerConfig {
    pub fn stacker(&self) -> Stacker {
        Stacker {
            rule: self.rule,
            bootstrap: (self.num_bootstrap > 0).then_some(Bootstrap {
                realizations: self.num_bootstrap,
                seed: self.random_seed,
                keep_realizations: self.keep_realizations,
            }),
            split: self.split.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            output_file: default_output_file(),
        }
    }
}

fn default_logging_level() -> String {
    "info".into()
}
fn default_wavelength_column() -> String {
    ColumnNames::default().wavelength
}
fn default_flux_column() -> String {
    ColumnNames::default().flux
}
fn default_ivar_column() -> String {
    ColumnNames::default().ivar
}
fn default_error_column() -> String {
    ColumnNames::default().error
}
fn default_id_column() -> String {
    ColumnNames::default().id
}
fn default_target() -> f64 {
    1.0
}
fn default_intervals() -> Vec<[f64; 2]> {
    vec![[1300.0, 1500.0], [2000.0, 2600.0], [4400.0, 4800.0]]
}
fn default_main_interval() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_seed() -> u64 {
    65_375_475
}
fn default_output_file() -> String {
    "stack.json".into()
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| StackingError::io(path, e))?;
        Config::from_toml_str(&text)
    }

    /// Parse, expand `$VAR/...` prefixes and validate.
    pub fn from_toml_str(text: &str) -> Result<Config> {
        let mut table = toml::Table::from_str(text)
            .map_err(|e| StackingError::Config(format!("invalid TOML: {e}")))?;
        for (key, value) in table.iter_mut() {
            expand_env(key, value)?;
        }
        let config: Config = toml::Value::Table(table)
            .try_into()
            .map_err(|e| StackingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StackingError::Config(e.to_string()))
    }

    pub fn logging_level(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.general.logging_level).map_err(|_| {
            StackingError::Config(format!(
                "[general] logging_level '{}' is not one of off, error, warn, info, debug, trace",
                self.general.logging_level
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.output_directory.as_os_str().is_empty() {
            return Err(StackingError::Config(
                "[general] output_directory must not be empty".into(),
            ));
        }
        self.logging_level()?;

        if self.reader.input.is_empty() {
            return Err(StackingError::Config(
                "[reader] input needs at least one file or directory".into(),
            ));
        }

        match &self.normalizer {
            NormalizerConfig::None => {}
            NormalizerConfig::Window { window, target, .. } => {
                check_interval("[normalizer] window", window)?;
                if !target.is_finite() || *target <= 0.0 {
                    return Err(StackingError::Config(format!(
                        "[normalizer] target must be a positive number, found {target}"
                    )));
                }
            }
            NormalizerConfig::MultipleRegions {
                intervals,
                main_interval,
            } => {
                if intervals.is_empty() {
                    return Err(StackingError::Config(
                        "[normalizer] intervals must not be empty".into(),
                    ));
                }
                for interval in intervals {
                    check_interval("[normalizer] intervals", interval)?;
                }
                if *main_interval >= intervals.len() {
                    return Err(StackingError::Config(format!(
                        "[normalizer] main_interval {main_interval} is out of range: only {} \
                         intervals given (indices start at 0)",
                        intervals.len()
                    )));
                }
            }
        }

        self.rebin.grid()?;

        if let Some(split) = &self.stacker.split {
            split.validate()?;
        }

        let output = &self.writer.output_file;
        if output.contains('/') || output.contains('\\') {
            return Err(StackingError::Config(format!(
                "[writer] output_file should be a bare file name, found '{output}'"
            )));
        }
        OutputFormat::from_path(Path::new(output))?;
        Ok(())
    }
}

fn check_interval(name: &str, interval: &[f64; 2]) -> Result<()> {
    let [start, end] = *interval;
    if !(start.is_finite() && end.is_finite()) || start >= end {
        return Err(StackingError::Config(format!(
            "{name}: interval [{start}, {end}] must have a start below its end"
        )));
    }
    Ok(())
}

/// Replace a leading `$NAME` in string values with the environment variable.
fn expand_env(key: &str, value: &mut toml::Value) -> Result<()> {
    match value {
        toml::Value::String(s) if s.starts_with('$') => {
            let end = s.find('/').unwrap_or(s.len());
            let name = &s[1..end];
            let resolved = std::env::var(name).map_err(|_| {
                StackingError::Config(format!(
                    "'{key}' uses the undefined environment variable {name}"
                ))
            })?;
            *s = format!("{resolved}{}", &s[end..]);
        }
        toml::Value::Array(items) => {
            for item in items {
                expand_env(key, item)?;
            }
        }
        toml::Value::Table(table) => {
            for (k, v) in table.iter_mut() {
                expand_env(k, v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run directory
// ---------------------------------------------------------------------------

/// The output directory of a run and its `stack/` and `log/` subfolders.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Create the folders and save a copy of the configuration.
    ///
    /// A directory holding a previous run (its config copy) is only reused
    /// with `overwrite`; the old copy is then kept with a timestamp suffix,
    /// plus a counter when that name is already taken.
    pub fn prepare(config: &Config, overwrite: bool) -> Result<RunDirectory> {
        let dir = RunDirectory {
            root: config.general.output_directory.clone(),
        };
        let copy = dir.root.join(CONFIG_COPY);
        if copy.exists() {
            if !overwrite {
                return Err(StackingError::Config(format!(
                    "{} contains a previous run; set overwrite = true in [general] or \
                     choose another output_directory",
                    dir.root.display()
                )));
            }
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let backup = free_backup_name(&dir.root, stamp);
            std::fs::rename(&copy, &backup).map_err(|e| StackingError::io(&copy, e))?;
            log::info!("previous configuration kept as {}", backup.display());
        }

        for folder in [dir.root.clone(), dir.stack_dir(), dir.log_dir()] {
            std::fs::create_dir_all(&folder).map_err(|e| StackingError::io(&folder, e))?;
        }
        crate::writer::write_atomic(&copy, config.to_toml_string()?.as_bytes())?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stack_dir(&self) -> PathBuf {
        self.root.join("stack")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }
}

/// `.config.toml.<stamp>`, or `.config.toml.<stamp>.<n>` for the first `n`
/// not yet present in `root`.
fn free_backup_name(root: &Path, stamp: u64) -> PathBuf {
    let first = root.join(format!("{CONFIG_COPY}.{stamp}"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| root.join(format!("{CONFIG_COPY}.{stamp}.{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MINIMAL: &str = r#"
        [general]
        output_directory = "out"

        [reader]
        input = ["spectra.parquet"]

        [rebin]
        min_wavelength = 1000.0
        max_wavelength = 2000.0
        step = 1.0
        step_type = "lin"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.normalizer, NormalizerConfig::None);
        assert_eq!(config.stacker, StackerConfig::default());
        assert_eq!(config.writer.output_file, "stack.json");
        assert_eq!(config.reader.columns(), ColumnNames::default());
        assert!(config.rebin.rebin);
        assert_eq!(config.logging_level().unwrap(), LevelFilter::Info);
        assert_eq!(config.rebin.grid().unwrap().len(), 1001);
    }

    #[test]
    fn full_config_parses() {
        let text = format!(
            "{MINIMAL}
            [normalizer]
            type = \"multiple_regions\"
            intervals = [[1100.0, 1200.0], [1400.0, 1500.0]]
            main_interval = 0

            [stacker]
            type = \"median\"
            num_bootstrap = 10

            [stacker.split]
            on = [\"z\"]
            intervals = [[2.0, 2.5, 3.0]]
            type = \"and\"

            [writer]
            output_file = \"stack.csv\"
            "
        );
        let config = Config::from_toml_str(&text).unwrap();
        let stacker = config.stacker.stacker();
        assert_eq!(stacker.rule, CombinationRule::Median);
        assert_eq!(stacker.bootstrap.unwrap().realizations, 10);
        assert_eq!(stacker.bootstrap.unwrap().seed, 65_375_475);
        assert_eq!(stacker.split.unwrap().num_groups(), 2);
        assert!(matches!(
            config.normalizer,
            NormalizerConfig::MultipleRegions { main_interval: 0, .. }
        ));
    }

    #[test]
    fn multiple_regions_defaults_follow_the_usual_windows() {
        let text = format!("{MINIMAL}\n[normalizer]\ntype = \"multiple_regions\"\n");
        let config = Config::from_toml_str(&text).unwrap();
        match config.normalizer {
            NormalizerConfig::MultipleRegions {
                intervals,
                main_interval,
            } => {
                assert_eq!(intervals.len(), 3);
                assert_eq!(main_interval, 1);
            }
            other => panic!("unexpected normalizer {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}\n[writer]\noutput_file = \"a.json\"\ncolour = \"red\"\n");
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("colour"), "{err}");
    }

    #[test]
    fn inconsistent_grid_is_rejected() {
        let text = MINIMAL.replace("step = 1.0", "step = 0.3");
        assert!(matches!(
            Config::from_toml_str(&text).unwrap_err(),
            StackingError::InvalidGrid(_)
        ));
    }

    #[test]
    fn bad_values_are_rejected() {
        let bad_main = format!(
            "{MINIMAL}\n[normalizer]\ntype = \"multiple_regions\"\nmain_interval = 3\n"
        );
        assert!(Config::from_toml_str(&bad_main).is_err());

        let bad_window =
            format!("{MINIMAL}\n[normalizer]\ntype = \"window\"\nwindow = [1500.0, 1400.0]\n");
        assert!(Config::from_toml_str(&bad_window).is_err());

        let bad_output = format!("{MINIMAL}\n[writer]\noutput_file = \"stack.fits\"\n");
        assert!(Config::from_toml_str(&bad_output).is_err());

        let nested_output = format!("{MINIMAL}\n[writer]\noutput_file = \"a/stack.json\"\n");
        assert!(Config::from_toml_str(&nested_output).is_err());

        let bad_level = MINIMAL.replace(
            "output_directory = \"out\"",
            "output_directory = \"out\"\nlogging_level = \"loud\"",
        );
        assert!(Config::from_toml_str(&bad_level).is_err());
    }

    #[test]
    fn environment_variables_are_expanded() {
        std::env::set_var("SPECTRAL_STACKING_TEST_ROOT", "/data/runs");
        let text = MINIMAL.replace("\"out\"", "\"$SPECTRAL_STACKING_TEST_ROOT/run1\"");
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(
            config.general.output_directory,
            PathBuf::from("/data/runs/run1")
        );

        let text = MINIMAL.replace("\"out\"", "\"$SPECTRAL_STACKING_UNDEFINED/run1\"");
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("SPECTRAL_STACKING_UNDEFINED"));
    }

    #[test]
    fn run_directory_refuses_to_clobber_a_previous_run() {
        let tmp = tempfile::tempdir().unwrap();
        let text = MINIMAL.replace(
            "\"out\"",
            &format!("{:?}", tmp.path().join("run").display().to_string()),
        );
        let config = Config::from_toml_str(&text).unwrap();

        let dir = RunDirectory::prepare(&config, false).unwrap();
        assert!(dir.stack_dir().is_dir());
        assert!(dir.log_dir().is_dir());
        let saved = Config::load(&dir.root().join(CONFIG_COPY)).unwrap();
        assert_eq!(saved, config);

        assert!(RunDirectory::prepare(&config, false).is_err());
        RunDirectory::prepare(&config, true).unwrap();
        let backups = std::fs::read_dir(dir.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".config.toml."))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn repeated_overwrites_keep_every_previous_config() {
        let tmp = tempfile::tempdir().unwrap();
        let text = MINIMAL.replace(
            "\"out\"",
            &format!("{:?}", tmp.path().join("run").display().to_string()),
        );
        let config = Config::from_toml_str(&text).unwrap();

        let dir = RunDirectory::prepare(&config, false).unwrap();
        for _ in 0..3 {
            RunDirectory::prepare(&config, true).unwrap();
        }
        let backups = std::fs::read_dir(dir.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".config.toml."))
            .count();
        assert_eq!(backups, 3);
        assert!(dir.root().join(CONFIG_COPY).exists());
    }

    #[test]
    fn backup_name_gets_a_counter_when_taken() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        assert_eq!(free_backup_name(root, 7), root.join(".config.toml.7"));
        std::fs::write(root.join(".config.toml.7"), "").unwrap();
        assert_eq!(free_backup_name(root, 7), root.join(".config.toml.7.1"));
        std::fs::write(root.join(".config.toml.7.1"), "").unwrap();
        assert_eq!(free_backup_name(root, 7), root.join(".config.toml.7.2"));
    }
}
