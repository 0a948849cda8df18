//! The common wavelength grid every spectrum is rebinned onto.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StackingError};

/// Relative tolerance when checking that the range is a whole number of steps.
const STEP_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// Evenly spaced in wavelength.
    Lin,
    /// Evenly spaced in log10(wavelength); `step` is in dex.
    Log,
}

/// Bin centres run from `start` to `end` inclusive, `step` apart in the
/// spacing's own space. Each bin spans its centre ± step/2.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    start: f64,
    end: f64,
    step: f64,
    step_type: StepType,
    #[serde(skip)]
    centres: Vec<f64>,
}

impl Grid {
    pub fn new(start: f64, end: f64, step: f64, step_type: StepType) -> Result<Self> {
        if !(start.is_finite() && end.is_finite() && step.is_finite()) {
            return Err(StackingError::InvalidGrid(format!(
                "start ({start}), end ({end}) and step ({step}) must be finite"
            )));
        }
        if step <= 0.0 {
            return Err(StackingError::InvalidGrid(format!(
                "step must be positive, got {step}"
            )));
        }
        if start >= end {
            return Err(StackingError::InvalidGrid(format!(
                "start ({start}) must be smaller than end ({end})"
            )));
        }
        if step_type == StepType::Log && start <= 0.0 {
            return Err(StackingError::InvalidGrid(format!(
                "a logarithmic grid needs a positive start, got {start}"
            )));
        }

        let (lo, hi) = match step_type {
            StepType::Lin => (start, end),
            StepType::Log => (start.log10(), end.log10()),
        };
        let steps = (hi - lo) / step;
        let n_steps = steps.round();
        if n_steps < 1.0 || (steps - n_steps).abs() > STEP_TOLERANCE * steps.max(1.0) {
            let expected = match step_type {
                StepType::Lin => lo + steps.floor().max(1.0) * step,
                StepType::Log => 10f64.powf(lo + steps.floor().max(1.0) * step),
            };
            return Err(StackingError::InvalidGrid(format!(
                "start ({start}) and end ({end}) must be separated by a whole number of \
                 steps ({step}); the closest end would be {expected}"
            )));
        }

        let n = n_steps as usize + 1;
        let centres = (0..n)
            .map(|i| {
                let c = lo + i as f64 * step;
                match step_type {
                    StepType::Lin => c,
                    StepType::Log => 10f64.powf(c),
                }
            })
            .collect();

        Ok(Grid {
            start,
            end,
            step,
            step_type,
            centres,
        })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    /// Bin centres in wavelength units.
    pub fn wavelengths(&self) -> &[f64] {
        &self.centres
    }

    pub fn len(&self) -> usize {
        self.centres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centres.is_empty()
    }

    /// Map a wavelength into the space the grid is evenly spaced in.
    pub(crate) fn to_axis(&self, wavelength: f64) -> f64 {
        match self.step_type {
            StepType::Lin => wavelength,
            StepType::Log => wavelength.log10(),
        }
    }

    /// Lower edge of the first bin, in axis space.
    pub(crate) fn axis_origin(&self) -> f64 {
        self.to_axis(self.start) - 0.5 * self.step
    }

    /// `[lo, hi)` edges of bin `i`, in axis space.
    pub(crate) fn axis_edges(&self, i: usize) -> (f64, f64) {
        let lo = self.axis_origin() + i as f64 * self.step;
        (lo, lo + self.step)
    }

    /// Whether `wavelength` matches the grid sample for sample.
    pub fn matches(&self, wavelength: &[f64]) -> bool {
        wavelength.len() == self.centres.len()
            && wavelength
                .iter()
                .zip(&self.centres)
                .all(|(a, b)| (a - b).abs() <= STEP_TOLERANCE * b.abs().max(1.0))
    }
}
