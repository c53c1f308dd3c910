use calamine::{Data, DataType as _, Reader as _, open_workbook_auto_from_rs};
use polars::prelude::{CsvReadOptions, DataFrame, DataType, SerReader as _};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

use super::types::{Column, Dataset, Value};
use crate::error::{PipelineError, Result};

/// Declared format of an upload, derived from its file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            other => Err(PipelineError::UnsupportedFormat(other.to_owned())),
        }
    }

    /// Checks an upload's file name before any bytes are parsed.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        Self::from_extension(ext)
    }

    pub fn is_spreadsheet(self) -> bool {
        matches!(self, Self::Xlsx | Self::Xls)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
        }
    }
}

/// Parses raw upload bytes into a dataset.
///
/// # Errors
///
/// `UnreadableInput` when the bytes are not valid for `format`, `EmptyInput`
/// when the table has no rows.
pub fn load_dataset(bytes: &[u8], format: SourceFormat) -> Result<Dataset> {
    let dataset = if format.is_spreadsheet() {
        read_spreadsheet(bytes)?
    } else {
        read_csv(bytes)?
    };

    if dataset.height() == 0 {
        return Err(PipelineError::EmptyInput);
    }

    tracing::info!(
        "Loaded {} rows x {} columns from {} input",
        dataset.height(),
        dataset.width(),
        format.extension()
    );
    Ok(dataset)
}

/// Reads a file from disk, choosing the parser from its extension.
pub fn load_path(path: &Path) -> Result<Dataset> {
    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let format = SourceFormat::from_filename(filename)?;
    let bytes = std::fs::read(path)?;
    load_dataset(&bytes, format)
}

fn read_csv(bytes: &[u8]) -> Result<Dataset> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    dataframe_to_dataset(&df)
}

fn dataframe_to_dataset(df: &DataFrame) -> Result<Dataset> {
    let columns = df
        .get_columns()
        .iter()
        .map(|col| -> Result<Column> {
            let series = col.as_materialized_series();
            let dtype = series.dtype();
            let values: Vec<Value> = if dtype.is_bool() {
                series
                    .bool()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Missing, Value::Bool))
                    .collect()
            } else if dtype.is_integer() {
                series
                    .cast(&DataType::Int64)?
                    .i64()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Missing, Value::Int))
                    .collect()
            } else if dtype.is_float() {
                series
                    .cast(&DataType::Float64)?
                    .f64()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Missing, Value::float))
                    .collect()
            } else {
                series
                    .cast(&DataType::String)?
                    .str()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Missing, |s| Value::Text(s.to_owned())))
                    .collect()
            };
            Ok(Column::new(col.name().to_string(), values))
        })
        .collect::<Result<Vec<_>>>()?;

    Dataset::new(columns)
}

fn read_spreadsheet(bytes: &[u8]) -> Result<Dataset> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook.worksheet_range_at(0).ok_or_else(|| {
        PipelineError::UnreadableInput("workbook contains no worksheets".to_owned())
    })??;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Err(PipelineError::EmptyInput);
    };

    let names = unique_column_names(
        header
            .iter()
            .enumerate()
            .map(|(i, cell)| match cell {
                Data::Empty => format!("Unnamed: {i}"),
                other => other.to_string().trim().to_owned(),
            })
            .collect(),
    );

    let mut values: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
    for row in rows {
        for (column, cell) in values.iter_mut().zip(row) {
            column.push(cell_value(cell));
        }
    }

    let columns = names
        .into_iter()
        .zip(values)
        .map(|(name, cells)| Column::new(name, cells))
        .collect();
    Dataset::new(columns)
}

pub(crate) fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(v) => Value::Int(*v),
        Data::Float(v) => Value::float(*v),
        Data::Bool(v) => Value::Bool(*v),
        Data::String(s) if s.trim().is_empty() => Value::Missing,
        Data::String(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        Data::DateTime(_) | Data::DateTimeIso(_) => {
            cell.as_datetime().map_or(Value::Missing, Value::Timestamp)
        }
        Data::Error(_) | Data::Empty => Value::Missing,
    }
}

/// Suffixes repeated header names with `.1`, `.2`, ... in order of appearance.
pub fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while seen.contains(&candidate) {
                candidate = format!("{name}.{n}");
                n += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}
