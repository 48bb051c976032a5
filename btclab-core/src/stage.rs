//! Stager: raw JSON snapshot → header-bearing CSV.
//!
//! Two payload shapes are understood:
//! - a single object (statistics endpoints) becomes a one-row table whose
//!   header is the object's keys in document order;
//! - an array of fixed 12-field arrays (candlesticks) becomes a table with the
//!   candle header, the trailing "ignore" field dropped.
//!
//! Anything else is rejected and no output file is produced. The output name
//! is a pure function of the input name, so re-running is idempotent.

use crate::schema::{KLINE_API_FIELDS, KLINE_COLUMNS};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("unsupported or empty JSON format in {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("candle row {row} in {path} has {found} fields, expected {expected}")]
    RowArity {
        path: PathBuf,
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("invalid JSON in {path}: {message}")]
    Json { path: PathBuf, message: String },

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A table ready to be written: header plus string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Outcome of converting one raw file in a batch.
#[derive(Debug)]
pub struct StageResult {
    pub raw: PathBuf,
    pub result: Result<PathBuf, StageError>,
}

/// Staged path for a raw file: same stem, `.csv`, inside `staged_dir`.
pub fn staged_path(raw: &Path, staged_dir: &Path) -> PathBuf {
    let stem = raw
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    staged_dir.join(format!("{stem}.csv"))
}

/// Shape a parsed payload into a table.
pub fn tabulate(data: &Value, path: &Path) -> Result<StagedTable, StageError> {
    let unsupported = |reason: &str| StageError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    match data {
        Value::Object(map) if !map.is_empty() => Ok(StagedTable {
            header: map.keys().cloned().collect(),
            rows: vec![map.values().map(cell).collect()],
        }),
        Value::Object(_) => Err(unsupported("empty object")),
        Value::Array(items) if items.is_empty() => Err(unsupported("empty array")),
        Value::Array(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let fields = item
                    .as_array()
                    .ok_or_else(|| unsupported("array elements are not arrays"))?;
                if fields.len() != KLINE_API_FIELDS.len() {
                    return Err(StageError::RowArity {
                        path: path.to_path_buf(),
                        row: i,
                        found: fields.len(),
                        expected: KLINE_API_FIELDS.len(),
                    });
                }
                rows.push(fields[..KLINE_COLUMNS.len()].iter().map(cell).collect());
            }
            Ok(StagedTable {
                header: KLINE_COLUMNS.iter().map(|c| c.to_string()).collect(),
                rows,
            })
        }
        _ => Err(unsupported("expected an object or an array of arrays")),
    }
}

/// Convert one raw JSON file into a CSV under `staged_dir`.
///
/// The CSV is written to a temporary name and renamed into place, so a
/// failed conversion never leaves a partial output behind.
pub fn convert(raw: &Path, staged_dir: &Path) -> Result<PathBuf, StageError> {
    let text = fs::read_to_string(raw).map_err(|source| StageError::Io {
        path: raw.to_path_buf(),
        source,
    })?;
    let data: Value = serde_json::from_str(&text).map_err(|e| StageError::Json {
        path: raw.to_path_buf(),
        message: e.to_string(),
    })?;
    let table = tabulate(&data, raw)?;

    fs::create_dir_all(staged_dir).map_err(|source| StageError::Io {
        path: staged_dir.to_path_buf(),
        source,
    })?;
    let out = staged_path(raw, staged_dir);
    let tmp = out.with_extension("csv.tmp");

    if let Err(e) = write_csv(&table, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, &out).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StageError::Io {
            path: out.clone(),
            source,
        }
    })?;

    tracing::info!(raw = %raw.display(), staged = %out.display(), rows = table.rows.len(), "converted");
    Ok(out)
}

/// Convert every `*.json` file in `raw_dir`. One bad file never stops the rest.
pub fn convert_all(raw_dir: &Path, staged_dir: &Path) -> Result<Vec<StageResult>, StageError> {
    let mut raws = list_with_extension(raw_dir, "json").map_err(|source| StageError::Io {
        path: raw_dir.to_path_buf(),
        source,
    })?;
    raws.sort();

    Ok(raws
        .into_iter()
        .map(|raw| {
            let result = convert(&raw, staged_dir);
            if let Err(e) = &result {
                tracing::error!("conversion failed: {e}");
            }
            StageResult { raw, result }
        })
        .collect())
}

/// Regular files in `dir` with the given extension (case-insensitive).
pub fn list_with_extension(dir: &Path, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if path.is_file() && matches {
            out.push(path);
        }
    }
    Ok(out)
}

fn write_csv(table: &StagedTable, path: &Path) -> Result<(), StageError> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(&table.header)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush().map_err(|source| StageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Render one JSON value as a CSV cell, keeping the text as given.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
