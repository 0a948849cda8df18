//! Rescaling spectra to a common flux level before they are combined.
//!
//! A spectrum is divided by a scale `s` derived from the flux in one or more
//! reference windows; its inverse variance is multiplied by `s²` so the noise
//! model survives the linear rescaling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::NormalizerConfig;
use crate::data::model::Spectrum;
use crate::error::{Result, StackingError};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    #[default]
    Mean,
    Median,
}

/// Reference window `[start, end]` (inclusive) and the value its flux
/// statistic is scaled to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceWindow {
    pub start: f64,
    pub end: f64,
    pub statistic: Statistic,
    pub target: f64,
}

/// Rescale `spectrum` so that its flux statistic inside `window` equals
/// `window.target`.
pub fn normalize_spectrum(spectrum: &Spectrum, window: &ReferenceWindow) -> Result<Spectrum> {
    let found = window_stats(spectrum, window.start, window.end, window.statistic).ok_or_else(
        || {
            StackingError::normalization(
                spectrum.id(),
                format!(
                    "no valid samples in the reference window [{}, {}]",
                    window.start, window.end
                ),
            )
        },
    )?;
    rescale(spectrum, found.factor / window.target)
}

/// Divide flux by `scale` and multiply ivar by `scale²`.
pub fn rescale(spectrum: &Spectrum, scale: f64) -> Result<Spectrum> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(StackingError::normalization(
            spectrum.id(),
            format!("normalization factor {scale} is not a positive number"),
        ));
    }
    let flux = spectrum.flux().iter().map(|f| f / scale).collect();
    let ivar = spectrum.ivar().iter().map(|w| w * scale * scale).collect();
    spectrum.with_values(flux, ivar)
}

/// Flux statistics of the unmasked samples in `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub factor: f64,
    pub signal_to_noise: f64,
    pub num_pixels: usize,
}

pub fn window_stats(
    spectrum: &Spectrum,
    start: f64,
    end: f64,
    statistic: Statistic,
) -> Option<WindowStats> {
    let (mut flux, variance): (Vec<f64>, Vec<f64>) = spectrum
        .samples()
        .filter(|&(l, _, w)| l >= start && l <= end && w > 0.0)
        .map(|(_, f, w)| (f, 1.0 / w))
        .unzip();
    let num_pixels = flux.len();
    let factor = match statistic {
        Statistic::Mean => stats::mean(&flux)?,
        Statistic::Median => stats::median(&mut flux)?,
    };
    let mean_noise = (variance.iter().sum::<f64>() / num_pixels as f64).sqrt();
    Some(WindowStats {
        factor,
        signal_to_noise: factor / mean_noise,
        num_pixels,
    })
}

// ---------------------------------------------------------------------------
// Normalizer – the configured strategy applied to a whole run
// ---------------------------------------------------------------------------

/// One row of the normalization factor table written to the log directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormRecord {
    pub spectrum: String,
    pub factor: Option<f64>,
    pub signal_to_noise: Option<f64>,
    pub num_pixels: usize,
    pub chosen_interval: Option<usize>,
}

/// Output of [`Normalizer::normalize_all`].
#[derive(Debug, Default)]
pub struct Normalized {
    pub spectra: Vec<Spectrum>,
    pub records: Vec<NormRecord>,
    /// Spectra that could not be normalized and were dropped.
    pub skipped: Vec<StackingError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalizer {
    None,
    Window(ReferenceWindow),
    MultipleRegions(MultipleRegions),
}

impl Normalizer {
    pub fn from_config(config: &NormalizerConfig) -> Self {
        match config {
            NormalizerConfig::None => Normalizer::None,
            NormalizerConfig::Window {
                window,
                statistic,
                target,
            } => Normalizer::Window(ReferenceWindow {
                start: window[0],
                end: window[1],
                statistic: *statistic,
                target: *target,
            }),
            NormalizerConfig::MultipleRegions {
                intervals,
                main_interval,
            } => Normalizer::MultipleRegions(MultipleRegions {
                intervals: intervals.iter().map(|i| (i[0], i[1])).collect(),
                main_interval: *main_interval,
            }),
        }
    }

    /// Whether this normalizer produces a factor table worth saving.
    pub fn has_records(&self) -> bool {
        !matches!(self, Normalizer::None)
    }

    /// Normalize every spectrum in parallel. Per-spectrum failures are
    /// skipped and reported; only run-level problems return `Err`.
    pub fn normalize_all(&self, spectra: Vec<Spectrum>) -> Result<Normalized> {
        match self {
            Normalizer::None => Ok(Normalized {
                spectra,
                ..Normalized::default()
            }),
            Normalizer::Window(window) => {
                let results: Vec<(NormRecord, Result<Spectrum>)> = spectra
                    .par_iter()
                    .map(|sp| {
                        let stats = window_stats(sp, window.start, window.end, window.statistic);
                        let record = NormRecord {
                            spectrum: sp.id().to_string(),
                            factor: stats.map(|s| s.factor),
                            signal_to_noise: stats.map(|s| s.signal_to_noise),
                            num_pixels: stats.map_or(0, |s| s.num_pixels),
                            chosen_interval: stats.map(|_| 0),
                        };
                        (record, normalize_spectrum(sp, window))
                    })
                    .collect();
                Ok(split_results(results))
            }
            Normalizer::MultipleRegions(regions) => regions.normalize_all(&spectra),
        }
    }
}

fn split_results(results: Vec<(NormRecord, Result<Spectrum>)>) -> Normalized {
    let mut out = Normalized::default();
    for (record, result) in results {
        out.records.push(record);
        match result {
            Ok(sp) => out.spectra.push(sp),
            Err(err) => {
                log::warn!("skipping spectrum: {err}");
                out.skipped.push(err);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Multiple regions
// ---------------------------------------------------------------------------

/// Normalization over several windows tied together by correction factors.
///
/// In each window the factor is the weighted mean flux, with weights
/// `ivar / (1 + SIGMA_I2 * ivar)` so that very precise pixels do not dominate.
/// A window whose factor is not positive counts as invalid. Every spectrum is
/// normalized in its valid window with the largest total weight. Factors from
/// secondary windows are brought onto the scale of the main window with
/// `mean(main factors) / mean(window factors)`, computed over the spectra
/// valid in both.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleRegions {
    pub intervals: Vec<(f64, f64)>,
    pub main_interval: usize,
}

/// Extra variance added to every pixel when weighting a region.
pub const SIGMA_I2: f64 = 0.0025;

/// Weighted flux statistics of one region of one spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStats {
    pub factor: f64,
    pub signal_to_noise: f64,
    pub num_pixels: usize,
    pub total_weight: f64,
}

/// Weighted statistics of the unmasked samples in `[start, end]`. `None` when
/// the region is empty or its factor is not a positive number.
pub fn region_stats(spectrum: &Spectrum, start: f64, end: f64) -> Option<RegionStats> {
    let mut num_pixels = 0;
    let mut total_weight = 0.0;
    let mut flux_weight = 0.0;
    let mut variance_weight = 0.0;
    for (_, f, ivar) in spectrum
        .samples()
        .filter(|&(l, _, w)| l >= start && l <= end && w > 0.0)
    {
        let w = ivar / (1.0 + SIGMA_I2 * ivar);
        num_pixels += 1;
        total_weight += w;
        flux_weight += f * w;
        variance_weight += w / ivar;
    }
    if num_pixels == 0 {
        return None;
    }

    let factor = flux_weight / total_weight;
    if !factor.is_finite() || factor <= 0.0 {
        return None;
    }
    let mean_noise = (variance_weight / total_weight).sqrt();
    Some(RegionStats {
        factor,
        signal_to_noise: factor / mean_noise,
        num_pixels,
        total_weight,
    })
}

impl MultipleRegions {
    /// Per-interval statistics for one spectrum.
    fn interval_stats(&self, spectrum: &Spectrum) -> Vec<Option<RegionStats>> {
        self.intervals
            .iter()
            .map(|&(start, end)| region_stats(spectrum, start, end))
            .collect()
    }

    /// Correction factor for each interval relative to the main one.
    pub fn correction_factors(&self, table: &[Vec<Option<RegionStats>>]) -> Result<Vec<f64>> {
        (0..self.intervals.len())
            .map(|index| {
                if index == self.main_interval {
                    return Ok(1.0);
                }
                let (main, other): (Vec<f64>, Vec<f64>) = table
                    .iter()
                    .filter_map(|row| match (row[self.main_interval], row[index]) {
                        (Some(m), Some(o)) => Some((m.factor, o.factor)),
                        _ => None,
                    })
                    .unzip();
                match (stats::mean(&main), stats::mean(&other)) {
                    (Some(m), Some(o)) if o != 0.0 => Ok(m / o),
                    _ => Err(StackingError::normalization(
                        format!("interval {index}"),
                        format!(
                            "no spectrum has valid samples both in interval {index} {:?} \
                             and in the main interval {} {:?}",
                            self.intervals[index],
                            self.main_interval,
                            self.intervals[self.main_interval]
                        ),
                    )),
                }
            })
            .collect()
    }

    fn normalize_all(&self, spectra: &[Spectrum]) -> Result<Normalized> {
        let table: Vec<Vec<Option<RegionStats>>> =
            spectra.par_iter().map(|sp| self.interval_stats(sp)).collect();
        let corrections = self.correction_factors(&table)?;
        log::debug!("normalization correction factors: {corrections:?}");

        let results = spectra
            .par_iter()
            .zip(table.par_iter())
            .map(|(sp, row)| {
                // largest total weight wins; the first interval on ties
                let best = row
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.map(|s| (i, s)))
                    .fold(None, |acc: Option<(usize, RegionStats)>, (i, s)| match acc {
                        Some((_, b)) if b.total_weight >= s.total_weight => acc,
                        _ => Some((i, s)),
                    });
                match best {
                    Some((interval, s)) => {
                        let factor = s.factor * corrections[interval];
                        let record = NormRecord {
                            spectrum: sp.id().to_string(),
                            factor: Some(factor),
                            signal_to_noise: Some(s.signal_to_noise),
                            num_pixels: s.num_pixels,
                            chosen_interval: Some(interval),
                        };
                        (record, rescale(sp, factor))
                    }
                    None => {
                        let record = NormRecord {
                            spectrum: sp.id().to_string(),
                            factor: None,
                            signal_to_noise: None,
                            num_pixels: 0,
                            chosen_interval: None,
                        };
                        let err = StackingError::normalization(
                            sp.id(),
                            "no valid samples in any normalization interval",
                        );
                        (record, Err(err))
                    }
                }
            })
            .collect();
        Ok(split_results(results))
    }
}
