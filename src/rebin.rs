//! Flux-conserving resampling of spectra onto a [`Grid`].
//!
//! Each source sample owns the interval between the midpoints to its
//! neighbours. Its `flux * ivar` and `ivar` are shared among the target bins
//! in proportion to how much of that interval each bin covers, so the totals
//! are conserved wherever the grid covers the source.

use crate::data::model::Spectrum;
use crate::error::{Result, StackingError};
use crate::grid::Grid;

/// Resample `spectrum` onto `grid`.
///
/// Bins with no overlapping unmasked input get weight 0. Fails with
/// `MalformedInput` if no valid sample overlaps the grid at all.
pub fn rebin(spectrum: &Spectrum, grid: &Grid) -> Result<Spectrum> {
    let n_bins = grid.len();
    let mut flux_ivar = vec![0.0; n_bins];
    let mut weight = vec![0.0; n_bins];

    let axis: Vec<f64> = spectrum
        .wavelength()
        .iter()
        .map(|&l| grid.to_axis(l))
        .collect();
    let edges = source_edges(&axis, grid.step());
    let origin = grid.axis_origin();
    let step = grid.step();

    for (i, (_, flux, ivar)) in spectrum.samples().enumerate() {
        if ivar <= 0.0 {
            continue;
        }
        let (lo, hi) = (edges[i], edges[i + 1]);
        let width = hi - lo;

        let first = ((lo - origin) / step).floor().max(0.0) as usize;
        let last = ((hi - origin) / step).floor();
        if last < 0.0 || first >= n_bins {
            continue;
        }
        let last = (last as usize).min(n_bins - 1);

        for bin in first..=last {
            let (bin_lo, bin_hi) = grid.axis_edges(bin);
            let overlap = hi.min(bin_hi) - lo.max(bin_lo);
            if overlap <= 0.0 {
                continue;
            }
            let fraction = overlap / width;
            flux_ivar[bin] += fraction * flux * ivar;
            weight[bin] += fraction * ivar;
        }
    }

    if weight.iter().all(|&w| w <= 0.0) {
        return Err(StackingError::malformed(
            spectrum.id(),
            format!(
                "no valid samples overlap the grid [{}, {}]",
                grid.start(),
                grid.end()
            ),
        ));
    }

    let flux = flux_ivar
        .iter()
        .zip(&weight)
        .map(|(&fw, &w)| if w > 0.0 { fw / w } else { 0.0 })
        .collect();
    log::trace!("rebinned '{}' onto {} bins", spectrum.id(), n_bins);

    spectrum.resampled(grid.wavelengths().to_vec(), flux, weight)
}

/// Pass a spectrum through unchanged when it already sits on `grid`.
pub fn align(spectrum: &Spectrum, grid: &Grid) -> Result<Spectrum> {
    if grid.matches(spectrum.wavelength()) {
        Ok(spectrum.clone())
    } else {
        Err(StackingError::malformed(
            spectrum.id(),
            format!(
                "rebinning is disabled but the spectrum ({} samples from {} to {}) \
                 is not on the common grid ({} bins from {} to {})",
                spectrum.len(),
                spectrum.wavelength()[0],
                spectrum.wavelength()[spectrum.len() - 1],
                grid.len(),
                grid.start(),
                grid.end()
            ),
        ))
    }
}

/// Edges of the source samples in axis space: `axis.len() + 1` values.
/// Inner edges are neighbour midpoints; the outer ones mirror the first and
/// last half-widths. A lone sample gets `default_width`.
fn source_edges(axis: &[f64], default_width: f64) -> Vec<f64> {
    let n = axis.len();
    if n == 1 {
        return vec![axis[0] - 0.5 * default_width, axis[0] + 0.5 * default_width];
    }
    let mut edges = Vec::with_capacity(n + 1);
    edges.push(axis[0] - 0.5 * (axis[1] - axis[0]));
    edges.extend(axis.windows(2).map(|w| 0.5 * (w[0] + w[1])));
    edges.push(axis[n - 1] + 0.5 * (axis[n - 1] - axis[n - 2]));
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::StepType;
    use proptest::prelude::*;

    fn total_flux_weight(sp: &Spectrum) -> f64 {
        sp.samples().map(|(_, f, w)| f * w).sum()
    }

    fn total_weight(sp: &Spectrum) -> f64 {
        sp.ivar().iter().sum()
    }

    #[test]
    fn identical_grid_is_identity() {
        let grid = Grid::new(0.0, 2.0, 1.0, StepType::Lin).unwrap();
        let sp = Spectrum::new("a", vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0], vec![1.0; 3])
            .unwrap();
        let out = rebin(&sp, &grid).unwrap();
        assert_eq!(out.flux(), &[1.0, 2.0, 3.0]);
        assert_eq!(out.ivar(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn conserves_flux_weight_on_finer_source() {
        // 8 samples, 0.5 apart, onto 4 bins of width 1 that cover them.
        let wavelength: Vec<f64> = (0..8).map(|i| 0.25 + 0.5 * i as f64).collect();
        let flux: Vec<f64> = (0..8).map(|i| 1.0 + i as f64).collect();
        let ivar = vec![2.0, 1.0, 4.0, 3.0, 1.0, 1.0, 2.0, 5.0];
        let sp = Spectrum::new("a", wavelength, flux, ivar).unwrap();
        let grid = Grid::new(0.5, 3.5, 1.0, StepType::Lin).unwrap();

        let out = rebin(&sp, &grid).unwrap();
        assert!((total_flux_weight(&out) - total_flux_weight(&sp)).abs() < 1e-9);
        assert!((total_weight(&out) - total_weight(&sp)).abs() < 1e-9);
        // first bin takes samples 0 and 1 whole
        assert!((out.flux()[0] - (2.0 * 1.0 + 1.0 * 2.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn coarse_source_distributes_weight() {
        // one sample per 2 units onto a grid of width 1
        let sp = Spectrum::new("a", vec![1.0, 3.0], vec![10.0, 20.0], vec![4.0, 2.0]).unwrap();
        let grid = Grid::new(0.5, 3.5, 1.0, StepType::Lin).unwrap();
        let out = rebin(&sp, &grid).unwrap();

        assert_eq!(out.ivar(), &[2.0, 2.0, 1.0, 1.0]);
        assert_eq!(out.flux(), &[10.0, 10.0, 20.0, 20.0]);
        assert!((total_weight(&out) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn partial_overlap_at_both_edges() {
        // source sample edges at [0.75, 1.25]: half in bin 0 ([0.5,1.0]) half in bin 1
        let sp = Spectrum::new(
            "a",
            vec![0.5, 1.0, 1.5],
            vec![0.0, 8.0, 0.0],
            vec![0.0, 2.0, 0.0],
        )
        .unwrap();
        let grid = Grid::new(0.75, 1.25, 0.5, StepType::Lin).unwrap();
        let out = rebin(&sp, &grid).unwrap();
        assert_eq!(out.ivar(), &[1.0, 1.0]);
        assert_eq!(out.flux(), &[8.0, 8.0]);
    }

    #[test]
    fn bins_without_data_get_zero_weight() {
        let sp = Spectrum::new("a", vec![0.0, 1.0], vec![1.0, 1.0], vec![1.0, 1.0]).unwrap();
        let grid = Grid::new(0.0, 4.0, 1.0, StepType::Lin).unwrap();
        let out = rebin(&sp, &grid).unwrap();
        assert_eq!(&out.ivar()[2..], &[0.0, 0.0, 0.0]);
        assert_eq!(out.valid_samples(), 2);
    }

    #[test]
    fn masked_samples_contribute_nothing() {
        let sp = Spectrum::new("a", vec![0.0, 1.0, 2.0], vec![1.0, 100.0, 3.0], vec![1.0, 0.0, 1.0])
            .unwrap();
        let grid = Grid::new(0.0, 2.0, 1.0, StepType::Lin).unwrap();
        let out = rebin(&sp, &grid).unwrap();
        assert_eq!(out.ivar()[1], 0.0);
        assert!((total_flux_weight(&out) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn no_overlap_is_malformed() {
        let sp = Spectrum::new("far", vec![100.0, 101.0], vec![1.0, 1.0], vec![1.0, 1.0]).unwrap();
        let grid = Grid::new(0.0, 2.0, 1.0, StepType::Lin).unwrap();
        let err = rebin(&sp, &grid).unwrap_err();
        assert!(err.to_string().contains("far"));
    }

    #[test]
    fn conserves_on_log_grid() {
        let grid = Grid::new(1000.0, 10000.0, 1e-3, StepType::Log).unwrap();
        let wavelength: Vec<f64> = (0..300).map(|i| 1100.0 + 2.5 * i as f64).collect();
        let flux: Vec<f64> = wavelength.iter().map(|l| (l / 100.0).sin() + 2.0).collect();
        let sp = Spectrum::new("log", wavelength, flux, vec![1.5; 300]).unwrap();

        let out = rebin(&sp, &grid).unwrap();
        let rel = (total_flux_weight(&out) - total_flux_weight(&sp)).abs() / total_flux_weight(&sp);
        assert!(rel < 1e-9, "relative drift {rel}");
    }

    #[test]
    fn single_sample_uses_grid_step() {
        let sp = Spectrum::new("one", vec![1.0], vec![5.0], vec![3.0]).unwrap();
        let grid = Grid::new(0.0, 2.0, 1.0, StepType::Lin).unwrap();
        let out = rebin(&sp, &grid).unwrap();
        assert_eq!(out.ivar(), &[0.0, 3.0, 0.0]);
    }

    #[test]
    fn align_requires_matching_axis() {
        let grid = Grid::new(0.0, 2.0, 1.0, StepType::Lin).unwrap();
        let on = Spectrum::new("on", vec![0.0, 1.0, 2.0], vec![1.0; 3], vec![1.0; 3]).unwrap();
        let off = Spectrum::new("off", vec![0.0, 1.5, 2.0], vec![1.0; 3], vec![1.0; 3]).unwrap();
        assert_eq!(align(&on, &grid).unwrap(), on);
        assert!(align(&off, &grid).is_err());
    }

    proptest! {
        #[test]
        fn rebinning_conserves_flux_times_weight(
            gaps in prop::collection::vec(0.1f64..2.0, 2..40),
            values in prop::collection::vec((-10.0f64..10.0, 0.0f64..5.0), 41),
        ) {
            let mut wavelength = vec![10.0];
            for g in &gaps {
                let last = *wavelength.last().unwrap();
                wavelength.push(last + g);
            }
            let n = wavelength.len();
            let flux: Vec<f64> = values[..n].iter().map(|v| v.0).collect();
            let mut ivar: Vec<f64> = values[..n].iter().map(|v| v.1).collect();
            ivar[0] = 1.0;
            let sp = Spectrum::new("p", wavelength, flux, ivar).unwrap();
            let grid = Grid::new(0.0, 100.0, 1.0, StepType::Lin).unwrap();

            let out = rebin(&sp, &grid).unwrap();
            let before = total_flux_weight(&sp);
            let after = total_flux_weight(&out);
            prop_assert!((before - after).abs() <= 1e-9 * (1.0 + before.abs()));
            prop_assert!((total_weight(&sp) - total_weight(&out)).abs() <= 1e-9 * total_weight(&sp));
        }
    }
}
