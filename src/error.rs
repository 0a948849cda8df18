use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong during a stacking run.
///
/// Per-spectrum failures (`MalformedInput`, `Normalization`) are usually
/// recorded and skipped by the pipeline; the rest abort the run.
#[derive(Debug, Error)]
pub enum StackingError {
    /// Bad input shape: mismatched arrays, non-monotonic wavelengths,
    /// negative weights, missing columns, or no valid samples.
    #[error("malformed input '{spectrum}': {reason}")]
    MalformedInput { spectrum: String, reason: String },

    /// The reference window(s) of a spectrum held nothing usable.
    #[error("cannot normalize '{spectrum}': {reason}")]
    Normalization { spectrum: String, reason: String },

    /// No bin of the grid received any data.
    #[error("empty stack: none of the {spectra} spectra contributed to any bin")]
    EmptyStack { spectra: usize },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StackingError {
    pub fn malformed(spectrum: impl Into<String>, reason: impl Into<String>) -> Self {
        StackingError::MalformedInput {
            spectrum: spectrum.into(),
            reason: reason.into(),
        }
    }

    pub fn normalization(spectrum: impl Into<String>, reason: impl Into<String>) -> Self {
        StackingError::Normalization {
            spectrum: spectrum.into(),
            reason: reason.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: impl Into<std::io::Error>) -> Self {
        StackingError::Write {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StackingError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the pipeline may skip the offending spectrum and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StackingError::MalformedInput { .. } | StackingError::Normalization { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StackingError>;
