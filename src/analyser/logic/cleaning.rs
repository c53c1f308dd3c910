use serde::Serialize;
use std::collections::HashSet;

use super::temporal::coerce_to_timestamp;
use super::types::{ColumnKind, Dataset, PreprocessingMeta, Value};

/// Transient per-run classification of columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnProfile {
    pub timestamp_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
}

/// Classifies the columns of a dataset without modifying it. A numeric column
/// with a time-like name counts as a timestamp, not a feature.
pub fn profile_columns(dataset: &Dataset) -> ColumnProfile {
    let timestamp_columns = detect_timestamp_columns(dataset);
    let numeric_columns = dataset
        .columns()
        .iter()
        .filter(|c| c.is_numeric() && !timestamp_columns.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();
    ColumnProfile {
        timestamp_columns,
        numeric_columns,
    }
}

/// Columns that are already timestamps, followed by columns whose name looks
/// time-like. A column matching both is listed once.
pub fn detect_timestamp_columns(dataset: &Dataset) -> Vec<String> {
    let mut found: Vec<String> = dataset
        .columns()
        .iter()
        .filter(|c| c.is_timestamp())
        .map(|c| c.name.clone())
        .collect();

    for column in dataset.columns() {
        if column.has_timestamp_name() && !found.contains(&column.name) {
            found.push(column.name.clone());
        }
    }
    found
}

/// Removes rows identical to an earlier row. Returns the number removed.
pub fn drop_duplicate_rows(dataset: &mut Dataset) -> usize {
    let mut seen = HashSet::new();
    let keep: Vec<bool> = (0..dataset.height())
        .map(|row| seen.insert(dataset.row_key(row)))
        .collect();
    let removed = keep.iter().filter(|k| !**k).count();
    if removed > 0 {
        dataset.retain_rows(&keep);
    }
    removed
}

/// Removes rows in which every cell is missing. Returns the number removed.
pub fn drop_empty_rows(dataset: &mut Dataset) -> usize {
    let keep: Vec<bool> = (0..dataset.height())
        .map(|row| !dataset.row_is_empty(row))
        .collect();
    let removed = keep.iter().filter(|k| !**k).count();
    if removed > 0 {
        dataset.retain_rows(&keep);
    }
    removed
}

/// Reparses every value of the named columns as a timestamp.
pub fn coerce_timestamp_columns(dataset: &mut Dataset, names: &[String]) {
    for column in dataset.columns_mut() {
        if !names.contains(&column.name) {
            continue;
        }

        let before = column.null_count();
        for value in &mut column.values {
            *value = coerce_to_timestamp(value);
        }
        column.kind = ColumnKind::Timestamp;

        let unparsed = column.null_count() - before;
        if unparsed > 0 {
            tracing::debug!(
                "Column '{}': {unparsed} values could not be parsed as timestamps",
                column.name
            );
        }
    }
}

/// Parameters fitted for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalerParams {
    pub column: String,
    /// Median used to fill missing cells before scaling.
    pub fill_value: f64,
    pub mean: f64,
    /// Population standard deviation as observed.
    pub std: f64,
    /// Divisor actually applied (1.0 for constant columns).
    pub scale: f64,
}

/// Z-score parameters for the numeric columns of one run. Lives only as long
/// as the run that fitted it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StandardScaler {
    pub params: Vec<ScalerParams>,
}

impl StandardScaler {
    pub fn get(&self, column: &str) -> Option<&ScalerParams> {
        self.params.iter().find(|p| p.column == column)
    }
}

/// Median of the finite values, averaging the middle pair for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(sorted.get(mid - 1)? / 2.0 + sorted.get(mid)? / 2.0)
    } else {
        sorted.get(mid).copied()
    }
}

/// Mean and population standard deviation.
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Largest finite magnitude in the values, or 1 when there is none.
fn magnitude(values: &[f64]) -> f64 {
    let max_abs = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if max_abs.is_finite() && max_abs > 0.0 {
        max_abs
    } else {
        1.0
    }
}

/// Fills missing numeric cells with the column median, then standardizes each
/// column. A zero-variance column scales by 1 and so becomes all zeros.
///
/// Moments are taken on the values divided by the column magnitude, so
/// columns near `f64::MAX` still produce finite scaled values.
pub fn normalize_numeric_columns(dataset: &mut Dataset, names: &[String]) -> StandardScaler {
    let mut scaler = StandardScaler::default();

    for column in dataset.columns_mut() {
        if !names.contains(&column.name) {
            continue;
        }

        let observed: Vec<f64> = column.f64_values().flatten().collect();
        let fill_value = median(&observed).unwrap_or(0.0);

        let filled: Vec<f64> = column
            .f64_values()
            .map(|v| v.unwrap_or(fill_value))
            .collect();
        let factor = magnitude(&filled);
        let unit: Vec<f64> = filled.iter().map(|v| v / factor).collect();
        let (unit_mean, unit_std) = mean_and_std(&unit).unwrap_or((0.0, 0.0));
        let mean = unit_mean * factor;
        let std = unit_std * factor;
        let scale = if std.is_finite() && std > 10.0 * f64::EPSILON {
            std
        } else {
            tracing::debug!("Column '{}' has zero variance; scaling by 1", column.name);
            1.0
        };
        let unit_scale = scale / factor;

        column.values = unit
            .iter()
            .map(|v| Value::float((v - unit_mean) / unit_scale))
            .collect();
        column.kind = ColumnKind::Numeric;

        scaler.params.push(ScalerParams {
            column: column.name.clone(),
            fill_value,
            mean,
            std,
            scale,
        });
    }

    scaler
}

#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    pub dataset: Dataset,
    pub meta: PreprocessingMeta,
    /// Present only when at least one numeric column was scaled.
    pub scaler: Option<StandardScaler>,
}

/// Deduplicates, drops empty rows, coerces time-like columns and standardizes
/// numeric ones.
pub fn preprocess_dataset(dataset: Dataset) -> PreprocessOutput {
    let mut dataset = dataset;
    let mut meta = PreprocessingMeta {
        initial_rows: dataset.height(),
        ..Default::default()
    };

    drop_duplicate_rows(&mut dataset);
    meta.after_duplicates_rows = dataset.height();

    drop_empty_rows(&mut dataset);
    meta.after_dropna_rows = dataset.height();

    let profile = profile_columns(&dataset);
    coerce_timestamp_columns(&mut dataset, &profile.timestamp_columns);

    let scaler = if profile.numeric_columns.is_empty() {
        None
    } else {
        Some(normalize_numeric_columns(&mut dataset, &profile.numeric_columns))
    };
    meta.date_columns = profile.timestamp_columns;
    meta.numeric_columns = profile.numeric_columns;
    meta.scaler_used = scaler.is_some();

    tracing::info!(
        "Preprocessed {} -> {} rows ({} duplicates, {} empty); {} timestamp, {} numeric columns",
        meta.initial_rows,
        meta.after_dropna_rows,
        meta.initial_rows - meta.after_duplicates_rows,
        meta.after_duplicates_rows - meta.after_dropna_rows,
        meta.date_columns.len(),
        meta.numeric_columns.len()
    );

    PreprocessOutput {
        dataset,
        meta,
        scaler,
    }
}
