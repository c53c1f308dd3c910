pub mod charts;
pub mod cleaning;
pub mod flows;
pub mod health;
pub mod io;
pub mod ml;
pub mod temporal;
pub mod types;

pub use charts::{ChartConfig, ChartData, ChartOutcome, ChartSpec, SkippedChart, select_chart_data};
pub use cleaning::{PreprocessOutput, StandardScaler, preprocess_dataset};
pub use flows::{AnalysisPipeline, ChartRenderer, RunResponse};
pub use health::{InsightReport, generate_insights};
pub use io::{SourceFormat, load_dataset, load_path};
pub use ml::{DetectionOutput, DetectorConfig, IsolationForest, detect_anomalies};
pub use types::{
    AnomalyLabel, Column, ColumnKind, Dataset, DetectorMeta, HealthStatus, PreprocessingMeta,
    RunSummary, Value,
};
