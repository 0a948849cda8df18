use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::error::{Result, StackingError};

// ---------------------------------------------------------------------------
// MetadataValue – one catalogue cell attached to a spectrum
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value (redshift, object class, plate id...).
/// Kept in `BTreeSet`s for the column index, so it must be `Ord`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text.
    Date(String),
    Null,
}

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use MetadataValue::*;
        fn rank(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Numeric view used by split cuts. Strings and nulls have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) if v.is_finite() => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum
// ---------------------------------------------------------------------------

/// One spectrum: flux sampled on increasing wavelengths, with inverse
/// variance weights. A weight of 0 marks a masked sample.
///
/// Only [`Spectrum::new`] builds one, so every instance holds the invariants:
/// equal array lengths, strictly increasing wavelength, finite non-negative
/// weights and at least one unmasked sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    id: String,
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    ivar: Vec<f64>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl Spectrum {
    /// Validate and build a spectrum. Samples with a non-finite flux or
    /// weight are masked.
    pub fn new(
        id: impl Into<String>,
        wavelength: Vec<f64>,
        flux: Vec<f64>,
        mut ivar: Vec<f64>,
    ) -> Result<Self> {
        let id = id.into();
        if wavelength.len() != flux.len() || wavelength.len() != ivar.len() {
            return Err(StackingError::malformed(
                id,
                format!(
                    "wavelength has {} values, flux {} and ivar {}",
                    wavelength.len(),
                    flux.len(),
                    ivar.len()
                ),
            ));
        }
        if wavelength.is_empty() {
            return Err(StackingError::malformed(id, "spectrum has no samples"));
        }
        if let Some(i) = wavelength.iter().position(|w| !w.is_finite()) {
            return Err(StackingError::malformed(
                id,
                format!("wavelength[{i}] is not finite"),
            ));
        }
        if let Some(i) = wavelength.windows(2).position(|w| w[1] <= w[0]) {
            return Err(StackingError::malformed(
                id,
                format!(
                    "wavelengths are not strictly increasing at index {} ({} -> {})",
                    i + 1,
                    wavelength[i],
                    wavelength[i + 1]
                ),
            ));
        }
        if let Some(i) = ivar.iter().position(|&w| w < 0.0) {
            return Err(StackingError::malformed(
                id,
                format!("ivar[{i}] = {} is negative", ivar[i]),
            ));
        }

        for (w, f) in ivar.iter_mut().zip(&flux) {
            if !f.is_finite() || !w.is_finite() {
                *w = 0.0;
            }
        }
        if ivar.iter().all(|&w| w == 0.0) {
            return Err(StackingError::malformed(id, "all samples are masked"));
        }

        Ok(Spectrum {
            id,
            wavelength,
            flux,
            ivar,
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, MetadataValue>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn ivar(&self) -> &[f64] {
        &self.ivar
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    /// Number of samples with non-zero weight.
    pub fn valid_samples(&self) -> usize {
        self.ivar.iter().filter(|&&w| w > 0.0).count()
    }

    /// Iterate over `(wavelength, flux, ivar)` triples.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.wavelength
            .iter()
            .zip(&self.flux)
            .zip(&self.ivar)
            .map(|((&l, &f), &w)| (l, f, w))
    }

    /// Same spectrum, new flux/ivar on the same wavelengths.
    pub(crate) fn with_values(&self, flux: Vec<f64>, ivar: Vec<f64>) -> Result<Self> {
        Spectrum::new(self.id.clone(), self.wavelength.clone(), flux, ivar)
            .map(|s| s.with_metadata(self.metadata.clone()))
    }

    /// Same identity and metadata, moved onto another axis.
    pub(crate) fn resampled(
        &self,
        wavelength: Vec<f64>,
        flux: Vec<f64>,
        ivar: Vec<f64>,
    ) -> Result<Self> {
        Spectrum::new(self.id.clone(), wavelength, flux, ivar)
            .map(|s| s.with_metadata(self.metadata.clone()))
    }
}

// ---------------------------------------------------------------------------
// SpectralDataset – everything loaded for one run
// ---------------------------------------------------------------------------

/// The loaded spectra with pre-computed metadata column indices.
#[derive(Debug, Clone, Default)]
pub struct SpectralDataset {
    pub spectra: Vec<Spectrum>,
    /// Ordered list of metadata column names.
    pub column_names: Vec<String>,
    /// For each metadata column the sorted set of unique values.
    pub unique_values: BTreeMap<String, BTreeSet<MetadataValue>>,
}

impl SpectralDataset {
    /// Build column indices from the loaded spectra.
    pub fn from_spectra(spectra: Vec<Spectrum>) -> Self {
        let mut unique_values: BTreeMap<String, BTreeSet<MetadataValue>> = BTreeMap::new();
        for sp in &spectra {
            for (col, val) in sp.metadata() {
                unique_values
                    .entry(col.clone())
                    .or_default()
                    .insert(val.clone());
            }
        }
        let column_names = unique_values.keys().cloned().collect();
        SpectralDataset {
            spectra,
            column_names,
            unique_values,
        }
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}
