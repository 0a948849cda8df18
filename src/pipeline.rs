//! One stacking run, from configuration to written report.

use std::path::PathBuf;
use std::time::Instant;

use rayon::prelude::*;

use crate::config::{Config, RunDirectory};
use crate::data::loader::{expand_inputs, load_all};
use crate::data::model::Spectrum;
use crate::error::{Result, StackingError};
use crate::grid::Grid;
use crate::normalize::Normalizer;
use crate::rebin::{align, rebin};
use crate::writer::{
    write_norm_factors, write_report, GroupSummary, Provenance, Skipped, StackReport,
};

/// File name of the normalization factor table inside the log directory.
pub const NORM_FACTORS_FILE: &str = "normalization_factors.csv";

/// What a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub report: StackReport,
    /// Files written, the main stack first.
    pub outputs: Vec<PathBuf>,
}

pub struct Pipeline {
    config: Config,
    overwrite: bool,
}

impl Pipeline {
    /// `overwrite` forces reuse of an output directory even when the
    /// configuration does not allow it.
    pub fn new(config: Config, overwrite: bool) -> Self {
        Pipeline { config, overwrite }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute the run, on a dedicated pool when `num_processors` is set.
    pub fn run(&self) -> Result<RunSummary> {
        match self.config.general.num_processors {
            0 => self.execute(),
            n => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| {
                        StackingError::Config(format!(
                            "[general] num_processors = {n}: cannot start worker pool: {e}"
                        ))
                    })?;
                log::debug!("running on {n} worker threads");
                pool.install(|| self.execute())
            }
        }
    }

    fn execute(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let config = &self.config;
        let dir = RunDirectory::prepare(config, self.overwrite || config.general.overwrite)?;
        let grid = config.rebin.grid()?;
        log::info!(
            "output directory {}, grid of {} bins from {} to {}",
            dir.root().display(),
            grid.len(),
            grid.start(),
            grid.end()
        );

        let mut skipped: Vec<StackingError> = Vec::new();

        let loaded = timed("loading spectra", || -> Result<_> {
            let files = expand_inputs(&config.reader.input)?;
            if files.is_empty() {
                return Err(StackingError::Config(
                    "[reader] input matched no .parquet, .json or .csv files".into(),
                ));
            }
            log::info!("reading {} files", files.len());
            Ok(load_all(&files, &config.reader.columns()))
        })?;
        let num_input = loaded.dataset.len() + loaded.skipped.len();
        skipped.extend(loaded.skipped);
        log::info!(
            "{} spectra loaded, metadata columns: {:?}",
            loaded.dataset.len(),
            loaded.dataset.column_names
        );
        if loaded.dataset.is_empty() {
            return Err(StackingError::EmptyStack { spectra: num_input });
        }

        let normalizer = Normalizer::from_config(&config.normalizer);
        let normalized = timed("normalizing", || {
            normalizer.normalize_all(loaded.dataset.spectra)
        })?;
        if normalizer.has_records() {
            write_norm_factors(&normalized.records, &dir.log_dir().join(NORM_FACTORS_FILE))?;
        }
        skipped.extend(normalized.skipped);

        let rebinned = timed("rebinning", || {
            resample_all(normalized.spectra, &grid, config.rebin.rebin)
        });
        skipped.extend(rebinned.1);
        let spectra = rebinned.0;
        if spectra.is_empty() {
            return Err(StackingError::EmptyStack { spectra: num_input });
        }

        let stacker = config.stacker.stacker();
        let outcome = timed("stacking", || stacker.run(&spectra, &grid))?;

        let mut provenance = Provenance::new(grid, stacker.rule, config.normalizer.clone());
        provenance.num_input = num_input;
        provenance.num_stacked = spectra.len();
        provenance.num_skipped = skipped.len();
        provenance.skipped = skipped.iter().map(Skipped::from).collect();
        provenance.bootstrap = stacker.bootstrap;
        provenance.split = stacker.split.clone();
        provenance.groups = outcome
            .groups
            .iter()
            .map(|g| GroupSummary {
                id: g.id,
                label: g.label.clone(),
                num_spectra: g.num_spectra,
            })
            .collect();

        let report = StackReport {
            provenance,
            stack: outcome.main,
            realizations: outcome.realizations,
            groups: outcome.groups,
        };
        let path = dir.stack_dir().join(&config.writer.output_file);
        let outputs = timed("writing", || write_report(&report, &path))?;

        log::info!(
            "stacked {} of {} spectra ({} skipped) in {:.2}s",
            report.provenance.num_stacked,
            num_input,
            report.provenance.num_skipped,
            started.elapsed().as_secs_f64()
        );
        Ok(RunSummary { report, outputs })
    }
}

/// Bring every spectrum onto `grid`, by rebinning or, when that is disabled,
/// by checking it already sits there. Returns the survivors and the failures.
fn resample_all(
    spectra: Vec<Spectrum>,
    grid: &Grid,
    rebin_enabled: bool,
) -> (Vec<Spectrum>, Vec<StackingError>) {
    let results: Vec<Result<Spectrum>> = spectra
        .par_iter()
        .map(|sp| if rebin_enabled { rebin(sp, grid) } else { align(sp, grid) })
        .collect();

    let mut kept = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(sp) => kept.push(sp),
            Err(err) => {
                log::warn!("skipping spectrum: {err}");
                failed.push(err);
            }
        }
    }
    (kept, failed)
}

fn timed<T>(step: &str, f: impl FnOnce() -> T) -> T {
    log::info!("{step}...");
    let start = Instant::now();
    let out = f();
    log::info!("{step} done in {:.2}s", start.elapsed().as_secs_f64());
    out
}
