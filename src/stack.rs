//! Bin-by-bin combination of spectra that share a [`Grid`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::filter::{assign_groups, SplitConfig};
use crate::data::model::Spectrum;
use crate::error::{Result, StackingError};
use crate::grid::Grid;
use crate::stats::{self, MAD_TO_SIGMA};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationRule {
    /// Inverse-variance weighted mean.
    #[default]
    WeightedMean,
    /// Plain mean of the contributing fluxes.
    Mean,
    Median,
}

/// One bin of a stacked spectrum. `flux` and `error` are `None` when no
/// spectrum contributed, which keeps "no data" apart from "zero flux".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedBin {
    pub wavelength: f64,
    pub flux: Option<f64>,
    pub error: Option<f64>,
    /// Sum of the contributing inverse variances.
    pub weight: f64,
    /// Number of spectra with non-zero weight in this bin.
    pub count: usize,
    #[serde(default)]
    pub bootstrap_error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedSpectrum {
    /// Spectra that went into the stack.
    pub num_spectra: usize,
    pub bins: Vec<StackedBin>,
}

impl StackedSpectrum {
    pub fn flux(&self) -> Vec<Option<f64>> {
        self.bins.iter().map(|b| b.flux).collect()
    }

    pub fn counts(&self) -> Vec<usize> {
        self.bins.iter().map(|b| b.count).collect()
    }

    pub fn errors(&self) -> Vec<Option<f64>> {
        self.bins.iter().map(|b| b.error).collect()
    }
}

/// Combine the `(flux, ivar)` column of one bin. Masked entries are ignored.
pub fn combine_bin(rule: CombinationRule, wavelength: f64, column: &[(f64, f64)]) -> StackedBin {
    let (mut flux, ivar): (Vec<f64>, Vec<f64>) =
        column.iter().copied().filter(|&(_, w)| w > 0.0).unzip();
    let count = flux.len();
    let weight: f64 = ivar.iter().sum();

    let (flux_value, error) = if count == 0 {
        (None, None)
    } else {
        match rule {
            CombinationRule::WeightedMean => {
                let fw: f64 = flux.iter().zip(&ivar).map(|(f, w)| f * w).sum();
                (Some(fw / weight), Some(1.0 / weight.sqrt()))
            }
            CombinationRule::Mean => {
                let n = count as f64;
                let variance: f64 = ivar.iter().map(|w| 1.0 / w).sum();
                (stats::mean(&flux), Some(variance.sqrt() / n))
            }
            CombinationRule::Median => {
                let centre = stats::median(&mut flux);
                let error = match (count, centre) {
                    (1, _) => Some(1.0 / weight.sqrt()),
                    (n, Some(c)) => stats::median_abs_deviation(&flux, c).map(|mad| {
                        MAD_TO_SIGMA * mad * std::f64::consts::FRAC_PI_2.sqrt() / (n as f64).sqrt()
                    }),
                    _ => None,
                };
                (centre, error)
            }
        }
    };

    StackedBin {
        wavelength,
        flux: flux_value,
        error,
        weight,
        count,
        bootstrap_error: None,
    }
}

/// Stack spectra that are already on `grid`.
pub fn stack(spectra: &[Spectrum], grid: &Grid, rule: CombinationRule) -> Result<StackedSpectrum> {
    let refs: Vec<&Spectrum> = spectra.iter().collect();
    stack_refs(&refs, grid, rule)
}

fn stack_refs(spectra: &[&Spectrum], grid: &Grid, rule: CombinationRule) -> Result<StackedSpectrum> {
    if let Some(off) = spectra.iter().find(|sp| !grid.matches(sp.wavelength())) {
        return Err(StackingError::malformed(
            off.id(),
            "spectrum is not on the common grid; rebin it first",
        ));
    }

    let bins: Vec<StackedBin> = grid
        .wavelengths()
        .par_iter()
        .enumerate()
        .map(|(i, &wavelength)| {
            let column: Vec<(f64, f64)> = spectra
                .iter()
                .map(|sp| (sp.flux()[i], sp.ivar()[i]))
                .collect();
            combine_bin(rule, wavelength, &column)
        })
        .collect();

    if bins.iter().all(|b| b.count == 0) {
        return Err(StackingError::EmptyStack {
            spectra: spectra.len(),
        });
    }

    Ok(StackedSpectrum {
        num_spectra: spectra.len(),
        bins,
    })
}

// ---------------------------------------------------------------------------
// Stacker – rule plus optional bootstrap and split stacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bootstrap {
    pub realizations: usize,
    pub seed: u64,
    pub keep_realizations: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStack {
    pub id: usize,
    pub label: String,
    pub num_spectra: usize,
    /// `None` when the group had no spectra or nothing to stack.
    pub stack: Option<StackedSpectrum>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackOutcome {
    pub main: StackedSpectrum,
    pub realizations: Vec<StackedSpectrum>,
    pub groups: Vec<GroupStack>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stacker {
    pub rule: CombinationRule,
    pub bootstrap: Option<Bootstrap>,
    pub split: Option<SplitConfig>,
}

impl Stacker {
    pub fn new(rule: CombinationRule) -> Self {
        Stacker {
            rule,
            bootstrap: None,
            split: None,
        }
    }

    pub fn run(&self, spectra: &[Spectrum], grid: &Grid) -> Result<StackOutcome> {
        let refs: Vec<&Spectrum> = spectra.iter().collect();
        let (main, realizations) = self.stack_with_errors(&refs, grid)?;

        let groups = match &self.split {
            Some(split) => self.stack_groups(spectra, grid, split),
            None => Vec::new(),
        };

        let realizations = match self.bootstrap {
            Some(b) if b.keep_realizations => realizations,
            _ => Vec::new(),
        };
        Ok(StackOutcome {
            main,
            realizations,
            groups,
        })
    }

    fn stack_with_errors(
        &self,
        spectra: &[&Spectrum],
        grid: &Grid,
    ) -> Result<(StackedSpectrum, Vec<StackedSpectrum>)> {
        let mut main = stack_refs(spectra, grid, self.rule)?;
        let Some(bootstrap) = self.bootstrap.filter(|b| b.realizations > 0) else {
            return Ok((main, Vec::new()));
        };

        // draw every resample up front so the result does not depend on
        // how rayon schedules the realizations
        let mut rng = StdRng::seed_from_u64(bootstrap.seed);
        let n = spectra.len();
        let draws: Vec<Vec<usize>> = (0..bootstrap.realizations)
            .map(|_| (0..n).map(|_| rng.random_range(0..n)).collect())
            .collect();

        let realizations: Vec<StackedSpectrum> = draws
            .par_iter()
            .filter_map(|indices| {
                let sample: Vec<&Spectrum> = indices.iter().map(|&i| spectra[i]).collect();
                stack_refs(&sample, grid, self.rule).ok()
            })
            .collect();
        log::debug!(
            "computed {} of {} bootstrap realizations",
            realizations.len(),
            bootstrap.realizations
        );

        for (i, bin) in main.bins.iter_mut().enumerate() {
            let fluxes: Vec<f64> = realizations.iter().filter_map(|r| r.bins[i].flux).collect();
            bin.bootstrap_error = if fluxes.len() >= 2 {
                stats::std_dev(&fluxes)
            } else {
                None
            };
        }
        Ok((main, realizations))
    }

    fn stack_groups(&self, spectra: &[Spectrum], grid: &Grid, split: &SplitConfig) -> Vec<GroupStack> {
        assign_groups(spectra, split)
            .into_iter()
            .map(|group| {
                let members: Vec<&Spectrum> = group.members.iter().map(|&i| &spectra[i]).collect();
                let stack = if members.is_empty() {
                    log::warn!("split group {} ({}) is empty", group.id, group.label);
                    None
                } else {
                    match self.stack_with_errors(&members, grid) {
                        Ok((s, _)) => Some(s),
                        Err(err) => {
                            log::warn!("split group {} ({}): {err}", group.id, group.label);
                            None
                        }
                    }
                };
                log::info!(
                    "split group {} ({}): {} spectra",
                    group.id,
                    group.label,
                    members.len()
                );
                GroupStack {
                    id: group.id,
                    label: group.label,
                    num_spectra: members.len(),
                    stack,
                }
            })
            .collect()
    }
}
