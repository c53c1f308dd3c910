use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{PipelineError, Result};

/// Name of the signed label column (+1 normal, -1 anomaly).
pub const ANOMALY_COLUMN: &str = "anomaly";
/// Name of the boolean convenience flag column (1 anomaly, 0 normal).
pub const IS_ANOMALY_COLUMN: &str = "is_anomaly";

/// Substrings that mark a column as time-like by name.
pub const TIMESTAMP_NAME_KEYWORDS: [&str; 4] = ["date", "time", "timestamp", "datetime"];

// CELLS

/// A single cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Builds a float cell, mapping NaN and infinities to `Missing`.
    pub fn float(v: f64) -> Self {
        if v.is_finite() {
            Self::Float(v)
        } else {
            Self::Missing
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Hashable identity used for duplicate detection.
    pub fn key(&self) -> ValueKey {
        match self {
            Self::Missing => ValueKey::Missing,
            Self::Int(v) => ValueKey::Int(*v),
            Self::Float(v) => {
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 {
                    ValueKey::Int(*v as i64)
                } else {
                    ValueKey::Float(v.to_bits())
                }
            }
            Self::Bool(v) => ValueKey::Bool(*v),
            Self::Text(v) => ValueKey::Text(v.clone()),
            Self::Timestamp(v) => ValueKey::Timestamp(*v),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f")),
        }
    }
}

/// Equality key for a cell. Integral floats collapse onto the integer key and
/// `-0.0` onto `0`, so `1` and `1.0` are duplicates of each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Missing,
    Int(i64),
    Float(u64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
}

// COLUMNS

/// Storage type of a column, the analogue of a dataframe dtype.
#[derive(Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Debug, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Boolean,
    Timestamp,
    Text,
    /// Every cell is missing.
    Empty,
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "Numeric",
            Self::Boolean => "Boolean",
            Self::Timestamp => "Timestamp",
            Self::Text => "Text",
            Self::Empty => "Empty",
        }
    }

    /// Infers the storage type from the cells. Only the non-missing cells vote;
    /// any disagreement between them makes the column `Text`.
    pub fn infer(values: &[Value]) -> Self {
        let mut kind: Option<Self> = None;
        for value in values {
            let cell_kind = match value {
                Value::Missing => continue,
                Value::Int(_) | Value::Float(_) => Self::Numeric,
                Value::Bool(_) => Self::Boolean,
                Value::Timestamp(_) => Self::Timestamp,
                Value::Text(_) => return Self::Text,
            };
            match kind {
                None => kind = Some(cell_kind),
                Some(k) if k != cell_kind => return Self::Text,
                Some(_) => {}
            }
        }
        kind.unwrap_or(Self::Empty)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

impl Column {
    /// Creates a column and infers its kind from the values.
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        let kind = ColumnKind::infer(&values);
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    pub fn with_kind(name: impl Into<String>, kind: ColumnKind, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }

    /// Numeric view of the column; non-numeric cells read as `None`.
    pub fn f64_values(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.values.iter().map(Value::as_f64)
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == ColumnKind::Numeric
    }

    pub fn is_timestamp(&self) -> bool {
        self.kind == ColumnKind::Timestamp
    }

    /// True when the column name contains one of the time-like keywords.
    pub fn has_timestamp_name(&self) -> bool {
        let lower = self.name.to_lowercase();
        TIMESTAMP_NAME_KEYWORDS.iter().any(|k| lower.contains(k))
    }
}

// DATASET

/// An ordered set of uniquely named, equal-length columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(PipelineError::DataProcessing(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }

        if let Some(first) = columns.first()
            && let Some(bad) = columns.iter().find(|c| c.len() != first.len())
        {
            return Err(PipelineError::DataProcessing(format!(
                "column '{}' has {} rows, expected {}",
                bad.name,
                bad.len(),
                first.len()
            )));
        }

        Ok(Self { columns })
    }

    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn row_key(&self, row: usize) -> Vec<ValueKey> {
        self.columns
            .iter()
            .map(|c| c.values.get(row).map_or(ValueKey::Missing, Value::key))
            .collect()
    }

    pub fn row_is_empty(&self, row: usize) -> bool {
        self.columns
            .iter()
            .all(|c| c.values.get(row).is_none_or(Value::is_missing))
    }

    /// Keeps the rows whose mask entry is `true`.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for column in &mut self.columns {
            let mut mask = keep.iter();
            column
                .values
                .retain(|_| mask.next().copied().unwrap_or(false));
        }
    }

    /// Appends a column, replacing any existing column with the same name in
    /// place.
    pub fn upsert_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.height() {
            return Err(PipelineError::DataProcessing(format!(
                "column '{}' has {} rows, expected {}",
                column.name,
                column.len(),
                self.height()
            )));
        }

        if let Some(existing) = self.columns.iter_mut().find(|c| c.name == column.name) {
            *existing = column;
        } else {
            self.columns.push(column);
        }
        Ok(())
    }

    /// Per-row anomaly flags read from the `is_anomaly` column, if present.
    pub fn anomaly_flags(&self) -> Option<Vec<bool>> {
        self.column(IS_ANOMALY_COLUMN).map(|c| {
            c.f64_values()
                .map(|v| v.is_some_and(|f| f != 0.0))
                .collect()
        })
    }

    /// Numeric columns that are features rather than anomaly labels.
    pub fn feature_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.is_numeric() && !is_label_column(&c.name))
            .collect()
    }
}

pub fn is_label_column(name: &str) -> bool {
    name == ANOMALY_COLUMN || name == IS_ANOMALY_COLUMN
}

// LABELS

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyLabel {
    Normal,
    Anomaly,
}

impl AnomalyLabel {
    /// Signed indicator in isolation-forest convention.
    pub fn signed(self) -> i64 {
        match self {
            Self::Normal => 1,
            Self::Anomaly => -1,
        }
    }

    pub fn flag(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Anomaly => 1,
        }
    }
}

// RUN METADATA

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingMeta {
    pub initial_rows: usize,
    pub after_duplicates_rows: usize,
    pub after_dropna_rows: usize,
    pub date_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub scaler_used: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorMeta {
    pub numeric_features_used: Vec<String>,
    pub model_trained: bool,
    pub contamination: f64,
    pub random_seed: u64,
    pub n_samples: usize,
    pub n_anomalies: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    NeedsAttention,
}

impl HealthStatus {
    /// `Healthy` strictly below the threshold.
    pub fn classify(anomaly_percentage: f64, threshold_pct: f64) -> Self {
        if anomaly_percentage < threshold_pct {
            Self::Healthy
        } else {
            Self::NeedsAttention
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::NeedsAttention => "needs_attention",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregations {
    pub normal_count: usize,
    pub health_status: HealthStatus,
}

/// One per run; written once and never modified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total_records: usize,
    pub total_anomalies: usize,
    pub anomaly_percentage: f64,
    pub anomaly_meta: DetectorMeta,
    pub preprocessing_meta: PreprocessingMeta,
    pub aggregations: Aggregations,
    pub generated_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn health_status(&self) -> HealthStatus {
        self.aggregations.health_status
    }
}
