use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray,
    LargeStringArray, ListArray, StringArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, SpectralDataset, Spectrum};
use crate::error::{Result, StackingError};

/// File extensions `load_file` understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["parquet", "pq", "json", "csv"];

/// Names of the columns that hold the spectral arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    pub wavelength: String,
    pub flux: String,
    pub ivar: String,
    /// Used when `ivar` is absent: ivar = 1 / error².
    pub error: String,
    /// Optional scalar column with the spectrum identifier.
    pub id: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            wavelength: "wavelength".into(),
            flux: "flux".into(),
            ivar: "ivar".into(),
            error: "error".into(),
            id: "specid".into(),
        }
    }
}

impl ColumnNames {
    fn is_array_column(&self, name: &str) -> bool {
        name == self.wavelength || name == self.flux || name == self.ivar || name == self.error
    }
}

/// Spectra read from one file, and the rows that were rejected.
#[derive(Debug, Default)]
pub struct LoadedFile {
    pub spectra: Vec<Spectrum>,
    pub rejected: Vec<StackingError>,
}

/// Everything read for a run.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub dataset: SpectralDataset,
    /// Files and rows that could not be used.
    pub skipped: Vec<StackingError>,
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Replace directories by the supported files they contain, sorted by name.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries =
                std::fs::read_dir(input).map_err(|e| StackingError::io(input.clone(), e))?;
            let mut found = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| StackingError::io(input.clone(), e))?.path();
                if path.is_file() && is_supported(&path) {
                    found.push(path);
                }
            }
            found.sort();
            if found.is_empty() {
                log::warn!("no spectral files found in {}", input.display());
            }
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load all files in parallel. Unreadable files and malformed rows are
/// logged, recorded in the report and left out of the dataset.
pub fn load_all(files: &[PathBuf], columns: &ColumnNames) -> LoadReport {
    let results: Vec<Result<LoadedFile>> =
        files.par_iter().map(|path| load_file(path, columns)).collect();

    let mut spectra = Vec::new();
    let mut skipped = Vec::new();
    for result in results {
        match result {
            Ok(file) => {
                spectra.extend(file.spectra);
                skipped.extend(file.rejected);
            }
            Err(err) => {
                log::warn!("skipping file: {err}");
                skipped.push(err);
            }
        }
    }
    LoadReport {
        dataset: SpectralDataset::from_spectra(spectra),
        skipped,
    }
}

/// Load the spectra in one file, dispatching on the extension.
///
/// Supported formats:
/// * `.parquet` – list columns for the arrays, scalar columns for metadata
/// * `.json`    – `[{ "wavelength": [...], "flux": [...], "ivar": [...], ...meta }, ...]`
/// * `.csv`     – array columns hold semicolon-separated floats
///
/// A file that cannot be read at all is an `Err`; individual bad rows end up
/// in [`LoadedFile::rejected`].
pub fn load_file(path: &Path, columns: &ColumnNames) -> Result<LoadedFile> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let rows = match ext.as_str() {
        "parquet" | "pq" => read_parquet(path, columns),
        "json" => read_json(path, columns),
        "csv" => read_csv(path, columns),
        other => Err(anyhow::anyhow!("unsupported file extension: .{other}")),
    }
    .map_err(|e| StackingError::malformed(path.display().to_string(), format!("{e:#}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut loaded = LoadedFile::default();
    for (row, raw) in rows.into_iter().enumerate() {
        let fallback_id = format!("{file_name}#{row}");
        let result = raw
            .map_err(|e| StackingError::malformed(fallback_id.clone(), format!("{e:#}")))
            .and_then(|raw| raw.into_spectrum(fallback_id));
        match result {
            Ok(sp) => loaded.spectra.push(sp),
            Err(err) => {
                log::warn!("skipping spectrum: {err}");
                loaded.rejected.push(err);
            }
        }
    }
    log::debug!(
        "{}: {} spectra loaded, {} rejected",
        path.display(),
        loaded.spectra.len(),
        loaded.rejected.len()
    );
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Raw rows, before validation
// ---------------------------------------------------------------------------

/// One row as read from disk. The arrays are not validated yet.
#[derive(Debug, Default)]
struct RawRow {
    id: Option<String>,
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    ivar: Option<Vec<f64>>,
    error: Option<Vec<f64>>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl RawRow {
    fn into_spectrum(self, fallback_id: String) -> Result<Spectrum> {
        let id = self.id.unwrap_or(fallback_id);
        let ivar = match (self.ivar, self.error) {
            (Some(ivar), _) => ivar,
            (None, Some(error)) => error.iter().map(|&e| ivar_from_error(e)).collect(),
            (None, None) => {
                return Err(StackingError::malformed(
                    id,
                    "neither an inverse variance nor an error array is present",
                ))
            }
        };
        Ok(Spectrum::new(id, self.wavelength, self.flux, ivar)?.with_metadata(self.metadata))
    }
}

/// `1 / error²`; non-positive or non-finite errors mask the sample.
fn ivar_from_error(error: f64) -> f64 {
    if error.is_finite() && error > 0.0 {
        1.0 / (error * error)
    } else {
        0.0
    }
}

type RawRows = Vec<anyhow::Result<RawRow>>;

// ---------------------------------------------------------------------------
// JSON reader
// ---------------------------------------------------------------------------

/// Records-oriented JSON, one object per spectrum:
///
/// ```json
/// [
///   {
///     "specid": "spec-0001",
///     "wavelength": [3600.0, 3601.0, ...],
///     "flux":       [1.02,   0.98,   ...],
///     "ivar":       [25.0,   24.1,   ...],
///     "z": 2.31
///   },
///   ...
/// ]
/// ```
fn read_json(path: &Path, columns: &ColumnNames) -> anyhow::Result<RawRows> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let records = root.as_array().context("expected a top-level JSON array")?;

    Ok(records
        .iter()
        .enumerate()
        .map(|(i, rec)| json_row(rec, i, columns))
        .collect())
}

fn json_row(rec: &JsonValue, i: usize, columns: &ColumnNames) -> anyhow::Result<RawRow> {
    let obj = rec
        .as_object()
        .with_context(|| format!("row {i} is not a JSON object"))?;

    let optional = |name: &str| -> anyhow::Result<Option<Vec<f64>>> {
        match obj.get(name) {
            Some(v) if !v.is_null() => json_array_to_f64(v, i, name).map(Some),
            _ => Ok(None),
        }
    };
    let required = |name: &str| -> anyhow::Result<Vec<f64>> {
        optional(name)?.with_context(|| format!("row {i}: missing '{name}' array"))
    };

    let mut row = RawRow {
        wavelength: required(&columns.wavelength)?,
        flux: required(&columns.flux)?,
        ivar: optional(&columns.ivar)?,
        error: optional(&columns.error)?,
        ..RawRow::default()
    };
    for (key, val) in obj {
        if columns.is_array_column(key) {
            continue;
        }
        let value = json_to_metadata(val);
        if *key == columns.id {
            row.id = (value != MetadataValue::Null).then(|| value.to_string());
        } else {
            row.metadata.insert(key.clone(), value);
        }
    }
    Ok(row)
}

fn json_array_to_f64(val: &JsonValue, row: usize, col: &str) -> anyhow::Result<Vec<f64>> {
    let arr = val
        .as_array()
        .with_context(|| format!("row {row}: '{col}' is not an array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            // null marks a missing sample
            JsonValue::Null => Ok(f64::NAN),
            _ => v
                .as_f64()
                .with_context(|| format!("row {row}, {col}[{j}]: not a number")),
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV reader
// ---------------------------------------------------------------------------

/// Header row with column names. Array columns hold semicolon-separated
/// floats, e.g. `"3600.0;3601.0;3602.0"`. Every other column is metadata.
fn read_csv(path: &Path, columns: &ColumnNames) -> anyhow::Result<RawRows> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let wavelength_idx = position(&columns.wavelength)
        .with_context(|| format!("CSV missing '{}' column", columns.wavelength))?;
    let flux_idx =
        position(&columns.flux).with_context(|| format!("CSV missing '{}' column", columns.flux))?;
    let ivar_idx = position(&columns.ivar);
    let error_idx = position(&columns.error);
    let id_idx = position(&columns.id);

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let row = result
            .with_context(|| format!("CSV row {row_no}"))
            .and_then(|record| {
                let floats = |idx: usize, col: &str| {
                    parse_semicolon_floats(record.get(idx).unwrap_or(""), row_no, col)
                };
                let mut raw = RawRow {
                    wavelength: floats(wavelength_idx, &columns.wavelength)?,
                    flux: floats(flux_idx, &columns.flux)?,
                    ivar: ivar_idx.map(|i| floats(i, &columns.ivar)).transpose()?,
                    error: error_idx.map(|i| floats(i, &columns.error)).transpose()?,
                    id: id_idx
                        .and_then(|i| record.get(i))
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                    ..RawRow::default()
                };
                for (col_idx, value) in record.iter().enumerate() {
                    let name = &headers[col_idx];
                    if columns.is_array_column(name) || *name == columns.id {
                        continue;
                    }
                    raw.metadata.insert(name.clone(), guess_metadata_type(value));
                }
                Ok(raw)
            });
        rows.push(row);
    }
    Ok(rows)
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> anyhow::Result<Vec<f64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    MetadataValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

/// Parquet layout: the array columns are `List<Float64>` (or `LargeList`,
/// or `Float32` items); any scalar column is metadata. Files written by
/// pandas, polars and `generate-sample` all work.
fn read_parquet(path: &Path, columns: &ColumnNames) -> anyhow::Result<RawRows> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    let mut offset = 0;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let index = |name: &str| schema.index_of(name).ok();

        let wavelength_idx = index(&columns.wavelength)
            .with_context(|| format!("parquet file missing '{}' column", columns.wavelength))?;
        let flux_idx = index(&columns.flux)
            .with_context(|| format!("parquet file missing '{}' column", columns.flux))?;
        let ivar_idx = index(&columns.ivar);
        let error_idx = index(&columns.error);
        let id_idx = index(&columns.id);

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, f)| !columns.is_array_column(f.name()) && Some(*i) != id_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..batch.num_rows() {
            let global = offset + row;
            let list = |idx: usize, col: &str| {
                extract_f64_list(batch.column(idx), row)
                    .with_context(|| format!("row {global}: failed to read '{col}'"))
            };
            let raw = (|| -> anyhow::Result<RawRow> {
                let mut raw = RawRow {
                    wavelength: list(wavelength_idx, &columns.wavelength)?,
                    flux: list(flux_idx, &columns.flux)?,
                    ivar: ivar_idx.map(|i| list(i, &columns.ivar)).transpose()?,
                    error: error_idx.map(|i| list(i, &columns.error)).transpose()?,
                    id: id_idx
                        .map(|i| extract_metadata_value(batch.column(i), row))
                        .filter(|v| *v != MetadataValue::Null)
                        .map(|v| v.to_string()),
                    ..RawRow::default()
                };
                for (col_idx, col_name) in &meta_cols {
                    let value = extract_metadata_value(batch.column(*col_idx), row);
                    raw.metadata.insert(col_name.clone(), value);
                }
                Ok(raw)
            })();
            rows.push(raw);
        }
        offset += batch.num_rows();
    }
    Ok(rows)
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Null items become NaN and are masked later.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> anyhow::Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("expected a List or LargeList column, got {other:?}"),
    };

    if let Some(arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        bail!(
            "list items are {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    if let Some(a) = any.downcast_ref::<StringArray>() {
        MetadataValue::String(a.value(row).to_string())
    } else if let Some(a) = any.downcast_ref::<LargeStringArray>() {
        MetadataValue::String(a.value(row).to_string())
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        MetadataValue::Integer(i64::from(a.value(row)))
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        MetadataValue::Integer(a.value(row))
    } else if let Some(a) = any.downcast_ref::<Float32Array>() {
        MetadataValue::Float(f64::from(a.value(row)))
    } else if let Some(a) = any.downcast_ref::<Float64Array>() {
        MetadataValue::Float(a.value(row))
    } else if let Some(a) = any.downcast_ref::<BooleanArray>() {
        MetadataValue::Bool(a.value(row))
    } else {
        MetadataValue::String(format!("{:?}", col.data_type()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arrow::array::{Float64Builder, ListBuilder};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn json_keeps_good_rows_and_rejects_bad_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "spectra.json",
            r#"[
                {"specid": "good", "wavelength": [1, 2, 3], "flux": [1, 2, 3], "ivar": [1, 1, 1], "z": 2.5},
                {"specid": "short", "wavelength": [1, 2, 3], "flux": [1, 2], "ivar": [1, 1, 1]},
                {"specid": "unsorted", "wavelength": [1, 3, 2], "flux": [1, 2, 3], "ivar": [1, 1, 1]},
                {"wavelength": [1, 2], "flux": [1, 2], "ivar": [0, 0]}
            ]"#,
        );
        let loaded = load_file(&path, &ColumnNames::default()).unwrap();

        assert_eq!(loaded.spectra.len(), 1);
        let sp = &loaded.spectra[0];
        assert_eq!(sp.id(), "good");
        assert_eq!(sp.metadata()["z"], MetadataValue::Float(2.5));
        assert!(!sp.metadata().contains_key("specid"));

        assert_eq!(loaded.rejected.len(), 3);
        let ids: Vec<String> = loaded
            .rejected
            .iter()
            .map(|e| match e {
                StackingError::MalformedInput { spectrum, .. } => spectrum.clone(),
                other => panic!("unexpected error {other}"),
            })
            .collect();
        assert_eq!(ids, vec!["short", "unsorted", "spectra.json#3"]);
    }

    #[test]
    fn null_json_id_falls_back_to_row_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "ids.json",
            r#"[
                {"specid": "named", "wavelength": [1, 2], "flux": [1, 1], "ivar": [1, 1]},
                {"specid": null, "wavelength": [1, 2], "flux": [1, 1], "ivar": [1, 1]}
            ]"#,
        );
        let loaded = load_file(&path, &ColumnNames::default()).unwrap();
        let ids: Vec<&str> = loaded.spectra.iter().map(|sp| sp.id()).collect();
        assert_eq!(ids, vec!["named", "ids.json#1"]);
    }

    #[test]
    fn error_column_becomes_ivar() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "err.json",
            r#"[{"wavelength": [1, 2, 3], "flux": [1, 1, 1], "error": [0.5, 0, 2]}]"#,
        );
        let loaded = load_file(&path, &ColumnNames::default()).unwrap();
        assert_eq!(loaded.spectra[0].ivar(), &[4.0, 0.0, 0.25]);
    }

    #[test]
    fn csv_with_custom_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "spectra.csv",
            "name,lambda,f,w,class\n\
             a,1;2;3,1;2;3,1;1;1,QSO\n\
             b,1;2;x,1;2;3,1;1;1,GAL\n",
        );
        let columns = ColumnNames {
            wavelength: "lambda".into(),
            flux: "f".into(),
            ivar: "w".into(),
            id: "name".into(),
            ..ColumnNames::default()
        };
        let loaded = load_file(&path, &columns).unwrap();
        assert_eq!(loaded.spectra.len(), 1);
        assert_eq!(loaded.spectra[0].id(), "a");
        assert_eq!(
            loaded.spectra[0].metadata()["class"],
            MetadataValue::String("QSO".into())
        );
        assert_eq!(loaded.rejected.len(), 1);
    }

    #[test]
    fn csv_without_flux_column_fails_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.csv", "wavelength,ivar\n1;2,1;1\n");
        let err = load_file(&path, &ColumnNames::default()).unwrap_err();
        assert!(err.to_string().contains("'flux'"));
    }

    #[test]
    fn parquet_lists_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.parquet");

        let list = |rows: &[&[f64]]| {
            let mut b = ListBuilder::new(Float64Builder::new());
            for row in rows {
                b.values().append_slice(row);
                b.append(true);
            }
            b.finish()
        };
        let item = Arc::new(Field::new("item", DataType::Float64, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("wavelength", DataType::List(item.clone()), false),
            Field::new("flux", DataType::List(item.clone()), false),
            Field::new("ivar", DataType::List(item), false),
            Field::new("z", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(list(&[&[1.0, 2.0], &[1.0, 2.0]])),
                Arc::new(list(&[&[5.0, 6.0], &[1.0]])),
                Arc::new(list(&[&[1.0, 1.0], &[1.0, 1.0]])),
                Arc::new(Float64Array::from(vec![0.5, 1.5])),
            ],
        )
        .unwrap();
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let loaded = load_file(&path, &ColumnNames::default()).unwrap();
        assert_eq!(loaded.spectra.len(), 1);
        assert_eq!(loaded.spectra[0].id(), "spectra.parquet#0");
        assert_eq!(loaded.spectra[0].flux(), &[5.0, 6.0]);
        assert_eq!(loaded.spectra[0].metadata()["z"], MetadataValue::Float(0.5));
        assert_eq!(loaded.rejected.len(), 1);
    }

    #[test]
    fn load_all_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.json",
            r#"[{"wavelength": [1, 2], "flux": [1, 1], "ivar": [1, 1]}]"#,
        );
        write(dir.path(), "b.json", "not json");
        write(dir.path(), "notes.txt", "ignored");

        let files = expand_inputs(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);
        let report = load_all(&files, &ColumnNames::default());
        assert_eq!(report.dataset.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].to_string().contains("b.json"));
    }
}
