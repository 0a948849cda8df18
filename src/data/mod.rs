/// Data layer: spectra, loading, and metadata splits.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse files → SpectralDataset (bad rows skipped)
///   └──────────┘
///        │
///        ▼
///   ┌────────────────┐
///   │ SpectralDataset │  Vec<Spectrum>, metadata column index
///   └────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  metadata intervals → split groups
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
