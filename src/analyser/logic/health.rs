use chrono::Utc;
use serde::Serialize;

use super::types::{
    Aggregations, Dataset, DetectorMeta, HealthStatus, IS_ANOMALY_COLUMN, PreprocessingMeta,
    RunSummary,
};
use crate::artifacts::{ArtifactLocation, ArtifactStore};
use crate::error::{PipelineError, Result};

/// Default share of anomalous rows (percent) at which a run needs attention.
pub const DEFAULT_HEALTH_THRESHOLD_PCT: f64 = 5.0;

#[derive(Debug, Clone, Serialize)]
pub struct InsightReport {
    pub summary: RunSummary,
    pub location: ArtifactLocation,
}

pub fn insight_file_name(run_id: &str) -> String {
    format!("{run_id}_insights.json")
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Share of anomalous rows in percent, rounded to 2 decimals. Zero rows gives 0.
pub fn anomaly_percentage(anomalies: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(anomalies as f64 / total as f64 * 100.0)
}

/// Counts flagged rows; a dataset without the flag column counts as none.
pub fn count_anomalies(dataset: &Dataset) -> usize {
    match dataset.anomaly_flags() {
        Some(flags) => flags.iter().filter(|f| **f).count(),
        None => {
            tracing::warn!("Column '{IS_ANOMALY_COLUMN}' missing; reporting zero anomalies");
            0
        }
    }
}

/// Builds the run summary without persisting it.
pub fn summarize_run(
    dataset: &Dataset,
    run_id: &str,
    anomaly_meta: DetectorMeta,
    preprocessing_meta: PreprocessingMeta,
    threshold_pct: f64,
) -> RunSummary {
    let total_records = dataset.height();
    let total_anomalies = count_anomalies(dataset).min(total_records);
    let pct = anomaly_percentage(total_anomalies, total_records);

    RunSummary {
        run_id: run_id.to_owned(),
        total_records,
        total_anomalies,
        anomaly_percentage: pct,
        anomaly_meta,
        preprocessing_meta,
        aggregations: Aggregations {
            normal_count: total_records - total_anomalies,
            health_status: HealthStatus::classify(pct, threshold_pct),
        },
        generated_at: Utc::now(),
    }
}

/// Summarizes a labeled dataset and writes `<run_id>_insights.json`.
///
/// # Errors
///
/// `PersistenceFailure` when the summary cannot be serialized or stored.
pub fn generate_insights(
    dataset: &Dataset,
    run_id: &str,
    anomaly_meta: DetectorMeta,
    preprocessing_meta: PreprocessingMeta,
    store: &dyn ArtifactStore,
    threshold_pct: f64,
) -> Result<InsightReport> {
    let summary = summarize_run(
        dataset,
        run_id,
        anomaly_meta,
        preprocessing_meta,
        threshold_pct,
    );

    let json = serde_json::to_vec_pretty(&summary)
        .map_err(|e| PipelineError::PersistenceFailure(e.to_string()))?;
    let name = insight_file_name(run_id);
    let location = store
        .put(&name, &json)
        .map_err(|e| PipelineError::PersistenceFailure(format!("{name}: {e:#}")))?;

    tracing::info!(
        "Run {run_id}: {}/{} anomalous rows ({}%), {}",
        summary.total_anomalies,
        summary.total_records,
        summary.anomaly_percentage,
        summary.health_status().as_str()
    );

    Ok(InsightReport { summary, location })
}
