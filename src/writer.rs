//! Writing stack results: the report itself plus the per-run side tables.
//!
//! Every file is encoded in memory, written to a temporary file next to the
//! target and renamed over it, so an earlier output is either kept whole or
//! replaced whole.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::NormalizerConfig;
use crate::data::filter::SplitConfig;
use crate::error::{Result, StackingError};
use crate::grid::Grid;
use crate::normalize::NormRecord;
use crate::stack::{Bootstrap, CombinationRule, GroupStack, StackedSpectrum};

/// Parquet key-value metadata entry holding the provenance JSON.
pub const PROVENANCE_KEY: &str = "stacking.provenance";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<OutputFormat> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "parquet" => Ok(OutputFormat::Parquet),
            _ => Err(StackingError::Config(format!(
                "[writer] output_file '{}' must end in .json, .csv or .parquet",
                path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// A spectrum or file left out of the stack, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub spectrum: String,
    pub reason: String,
}

impl From<&StackingError> for Skipped {
    fn from(err: &StackingError) -> Self {
        match err {
            StackingError::MalformedInput { spectrum, reason }
            | StackingError::Normalization { spectrum, reason } => Skipped {
                spectrum: spectrum.clone(),
                reason: reason.clone(),
            },
            other => Skipped {
                spectrum: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub id: usize,
    pub label: String,
    pub num_spectra: usize,
}

/// How a stack was made.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub version: String,
    pub created: DateTime<Utc>,
    pub grid: Grid,
    pub rule: CombinationRule,
    pub normalizer: NormalizerConfig,
    pub num_input: usize,
    pub num_stacked: usize,
    pub num_skipped: usize,
    pub skipped: Vec<Skipped>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<Bootstrap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupSummary>,
}

impl Provenance {
    pub fn new(grid: Grid, rule: CombinationRule, normalizer: NormalizerConfig) -> Self {
        Provenance {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            grid,
            rule,
            normalizer,
            num_input: 0,
            num_stacked: 0,
            num_skipped: 0,
            skipped: Vec::new(),
            bootstrap: None,
            split: None,
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackReport {
    pub provenance: Provenance,
    pub stack: StackedSpectrum,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub realizations: Vec<StackedSpectrum>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupStack>,
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write `report` to `path` in the format given by its extension. Returns
/// every file written, the main one first.
///
/// JSON holds the whole report. CSV and Parquet hold the main bins, with
/// the provenance in `<stem>.provenance.json` (CSV) or the file metadata
/// (Parquet), and one `<stem>_group<N>` file per non-empty split group.
/// Group files from an earlier run that this one did not write are removed.
pub fn write_report(report: &StackReport, path: &Path) -> Result<Vec<PathBuf>> {
    let format = OutputFormat::from_path(path)?;
    let mut written = vec![path.to_path_buf()];

    match format {
        OutputFormat::Json => {
            let bytes = serde_json::to_vec_pretty(report)
                .map_err(|e| StackingError::write(path, io::Error::other(e)))?;
            write_atomic(path, &bytes)?;
        }
        OutputFormat::Csv => {
            let bytes = encode_csv(&report.stack).map_err(|e| StackingError::write(path, e))?;
            write_atomic(path, &bytes)?;

            let provenance = path.with_extension("provenance.json");
            let bytes = serde_json::to_vec_pretty(&report.provenance)
                .map_err(|e| StackingError::write(&provenance, io::Error::other(e)))?;
            write_atomic(&provenance, &bytes)?;
            written.push(provenance);
        }
        OutputFormat::Parquet => {
            let provenance = serde_json::to_string(&report.provenance)
                .map_err(|e| StackingError::write(path, io::Error::other(e)))?;
            let metadata = vec![KeyValue::new(PROVENANCE_KEY.to_string(), provenance)];
            let bytes = encode_parquet(&report.stack, metadata)
                .map_err(|e| StackingError::write(path, e))?;
            write_atomic(path, &bytes)?;
        }
    }

    if format != OutputFormat::Json {
        for group in &report.groups {
            let Some(stack) = &group.stack else {
                log::debug!("split group {} has no stack, nothing written", group.id);
                continue;
            };
            let group_path = group_file(path, group.id);
            let bytes = match format {
                OutputFormat::Csv => encode_csv(stack),
                _ => {
                    let label = KeyValue::new("stacking.group".to_string(), group.label.clone());
                    encode_parquet(stack, vec![label])
                }
            }
            .map_err(|e| StackingError::write(&group_path, e))?;
            write_atomic(&group_path, &bytes)?;
            written.push(group_path);
        }
        remove_stale_groups(path, &written)?;
    }

    for file in &written {
        log::info!("wrote {}", file.display());
    }
    Ok(written)
}

/// Save the per-spectrum normalization factors as CSV.
pub fn write_norm_factors(records: &[NormRecord], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for record in records {
        wtr.serialize(record).map_err(|e| StackingError::write(path, e))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| StackingError::write(path, e.into_error()))?;
    write_atomic(path, &bytes)
}

/// Write `bytes` to a temporary file beside `path`, then rename it over
/// `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StackingError::write(path, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StackingError::write(path, e))?;
    tmp.persist(path).map_err(|e| StackingError::write(path, e))?;
    Ok(())
}

fn group_file(path: &Path, id: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_group{id}.{ext}"))
}

/// Delete `<stem>_group<N>` files beside `path` that this run did not write,
/// left over from an earlier run in the same directory.
fn remove_stale_groups(path: &Path, written: &[PathBuf]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!("{stem}_group");
    let suffix = format!(".{ext}");

    let entries = std::fs::read_dir(dir).map_err(|e| StackingError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StackingError::io(dir, e))?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let is_group = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
            .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()));
        let current = written
            .iter()
            .any(|w| w.file_name() == Some(file_name.as_os_str()));
        if is_group && !current {
            let stale = entry.path();
            std::fs::remove_file(&stale).map_err(|e| StackingError::write(&stale, e))?;
            log::info!("removed {} from an earlier run", stale.display());
        }
    }
    Ok(())
}

fn encode_csv(stack: &StackedSpectrum) -> io::Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for bin in &stack.bins {
        wtr.serialize(bin)?;
    }
    wtr.into_inner().map_err(|e| e.into_error())
}

fn encode_parquet(stack: &StackedSpectrum, metadata: Vec<KeyValue>) -> io::Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("wavelength", DataType::Float64, false),
        Field::new("flux", DataType::Float64, true),
        Field::new("error", DataType::Float64, true),
        Field::new("weight", DataType::Float64, false),
        Field::new("count", DataType::UInt64, false),
        Field::new("bootstrap_error", DataType::Float64, true),
    ]));

    let bins = &stack.bins;
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from_iter_values(bins.iter().map(|b| b.wavelength))),
        Arc::new(bins.iter().map(|b| b.flux).collect::<Float64Array>()),
        Arc::new(bins.iter().map(|b| b.error).collect::<Float64Array>()),
        Arc::new(Float64Array::from_iter_values(bins.iter().map(|b| b.weight))),
        Arc::new(UInt64Array::from_iter_values(bins.iter().map(|b| b.count as u64))),
        Arc::new(bins.iter().map(|b| b.bootstrap_error).collect::<Float64Array>()),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(io::Error::other)?;

    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(metadata))
        .build();
    let mut buffer = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buffer, schema, Some(props)).map_err(io::Error::other)?;
    writer.write(&batch).map_err(io::Error::other)?;
    writer.close().map_err(io::Error::other)?;
    Ok(buffer)
}
