//! Chart data selection.
//!
//! Each chart is built independently from the labeled dataset. A builder that
//! cannot produce its chart yields [`ChartOutcome::Skipped`] with a reason
//! instead of failing the run. Pixel rendering is not done here; see
//! [`ChartRenderer`](super::flows::ChartRenderer).

use anyhow::{Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{Column, Dataset, Value};

/// Numeric features considered by the ranking chart.
pub const RANKING_FEATURE_LIMIT: usize = 10;
/// Numeric features compared in the distribution chart.
pub const DISTRIBUTION_FEATURE_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub max_trend_charts: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            max_trend_charts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChartX {
    Index(usize),
    Time(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub x: ChartX,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCorrelation {
    pub feature: String,
    /// Absolute Pearson correlation with the anomaly flag.
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDistribution {
    pub feature: String,
    pub normal: Vec<f64>,
    pub anomalous: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartData {
    Trend {
        column: String,
        /// Name of the timestamp column used for x, or `None` for row index.
        x_column: Option<String>,
        points: Vec<TrendPoint>,
        anomalies: Vec<TrendPoint>,
    },
    AnomalyTimeline {
        timestamp_column: String,
        counts: Vec<DailyCount>,
    },
    FeatureRanking {
        features: Vec<FeatureCorrelation>,
    },
    Distributions {
        features: Vec<FeatureDistribution>,
    },
    HealthOverview {
        normal_count: usize,
        anomaly_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    /// Stable identifier used in artifact names, e.g. `amount_trend`.
    pub descriptor: String,
    pub title: String,
    pub data: ChartData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedChart {
    pub chart: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartOutcome {
    Ready(ChartSpec),
    Skipped { chart: String, reason: String },
}

impl ChartOutcome {
    pub fn descriptor(&self) -> &str {
        match self {
            Self::Ready(spec) => &spec.descriptor,
            Self::Skipped { chart, .. } => chart,
        }
    }

    pub fn ready(&self) -> Option<&ChartSpec> {
        match self {
            Self::Ready(spec) => Some(spec),
            Self::Skipped { .. } => None,
        }
    }

    pub fn skipped(&self) -> Option<SkippedChart> {
        match self {
            Self::Ready(_) => None,
            Self::Skipped { chart, reason } => Some(SkippedChart {
                chart: chart.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

fn run_step(descriptor: &str, build: impl FnOnce() -> Result<ChartSpec>) -> ChartOutcome {
    match build() {
        Ok(spec) => ChartOutcome::Ready(spec),
        Err(e) => {
            tracing::warn!("Skipping chart '{descriptor}': {e}");
            ChartOutcome::Skipped {
                chart: descriptor.to_owned(),
                reason: e.to_string(),
            }
        }
    }
}

/// Pearson correlation of paired samples. `None` with fewer than two pairs or
/// when either side has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = xs.iter().take(n).sum::<f64>() / nf;
    let mean_y = ys.iter().take(n).sum::<f64>() / nf;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    let r = cov / denom;
    r.is_finite().then_some(r)
}

/// Builds every chart the dataset supports, in a fixed order: feature trends,
/// anomaly timeline, feature ranking, distributions, health overview.
pub fn select_chart_data(dataset: &Dataset, config: &ChartConfig) -> Vec<ChartOutcome> {
    let features = dataset.feature_columns();
    let flags = dataset.anomaly_flags();
    let time_column = dataset.columns().iter().find(|c| c.is_timestamp());

    let mut outcomes = Vec::new();

    if features.is_empty() {
        outcomes.push(ChartOutcome::Skipped {
            chart: "trend".to_owned(),
            reason: "No numeric feature columns".to_owned(),
        });
    }
    for column in features.iter().take(config.max_trend_charts) {
        let descriptor = format!("{}_trend", column.name);
        outcomes.push(run_step(&descriptor, || {
            build_trend(&descriptor, column, time_column, flags.as_deref())
        }));
    }

    outcomes.push(run_step("anomaly_time", || {
        build_anomaly_timeline(time_column, flags.as_deref())
    }));
    outcomes.push(run_step("feature_ranking", || {
        build_feature_ranking(&features, flags.as_deref())
    }));
    outcomes.push(run_step("distributions", || {
        build_distributions(&features, flags.as_deref())
    }));
    outcomes.push(run_step("health", || {
        Ok(build_health(dataset.height(), flags.as_deref()))
    }));

    let ready = outcomes.iter().filter(|o| o.ready().is_some()).count();
    tracing::info!(
        "Selected {ready} charts ({} skipped)",
        outcomes.len() - ready
    );
    outcomes
}

fn build_trend(
    descriptor: &str,
    column: &Column,
    time_column: Option<&Column>,
    flags: Option<&[bool]>,
) -> Result<ChartSpec> {
    let mut points = Vec::new();
    let mut anomalies = Vec::new();

    for (row, value) in column.values.iter().enumerate() {
        let Some(y) = value.as_f64() else {
            continue;
        };
        let x = match time_column {
            Some(tc) => match tc.values.get(row).and_then(Value::as_timestamp) {
                Some(ts) => ChartX::Time(ts),
                None => continue,
            },
            None => ChartX::Index(row),
        };
        let point = TrendPoint { x, y };
        if flags.is_some_and(|f| f.get(row).copied().unwrap_or(false)) {
            anomalies.push(point.clone());
        }
        points.push(point);
    }

    if points.is_empty() {
        bail!("Column '{}' has no plottable values", column.name);
    }

    Ok(ChartSpec {
        descriptor: descriptor.to_owned(),
        title: format!("{} with anomalies highlighted", column.name),
        data: ChartData::Trend {
            column: column.name.clone(),
            x_column: time_column.map(|c| c.name.clone()),
            points,
            anomalies,
        },
    })
}

fn build_anomaly_timeline(
    time_column: Option<&Column>,
    flags: Option<&[bool]>,
) -> Result<ChartSpec> {
    let Some(time_column) = time_column else {
        bail!("No timestamp column");
    };
    let Some(flags) = flags else {
        bail!("No anomaly labels");
    };

    let mut daily: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for (value, flagged) in time_column.values.iter().zip(flags) {
        if let Some(ts) = value.as_timestamp() {
            *daily.entry(ts.date()).or_default() += usize::from(*flagged);
        }
    }

    if daily.is_empty() {
        bail!("Column '{}' has no parseable timestamps", time_column.name);
    }

    Ok(ChartSpec {
        descriptor: "anomaly_time".to_owned(),
        title: "Anomalies per day".to_owned(),
        data: ChartData::AnomalyTimeline {
            timestamp_column: time_column.name.clone(),
            counts: daily
                .into_iter()
                .map(|(date, count)| DailyCount { date, count })
                .collect(),
        },
    })
}

fn build_feature_ranking(features: &[&Column], flags: Option<&[bool]>) -> Result<ChartSpec> {
    let Some(flags) = flags else {
        bail!("No anomaly labels");
    };
    if features.is_empty() {
        bail!("No numeric feature columns");
    }

    let mut ranking: Vec<FeatureCorrelation> = features
        .iter()
        .take(RANKING_FEATURE_LIMIT)
        .map(|column| {
            let (xs, ys): (Vec<f64>, Vec<f64>) = column
                .f64_values()
                .zip(flags)
                .filter_map(|(v, f)| v.map(|x| (x, if *f { 1.0 } else { 0.0 })))
                .unzip();
            let correlation = pearson(&xs, &ys).map_or(0.0, f64::abs);
            FeatureCorrelation {
                feature: column.name.clone(),
                correlation,
            }
        })
        .collect();

    ranking.sort_by(|a, b| b.correlation.total_cmp(&a.correlation));
    ranking.truncate(RANKING_FEATURE_LIMIT);

    Ok(ChartSpec {
        descriptor: "feature_ranking".to_owned(),
        title: "Features most associated with anomalies".to_owned(),
        data: ChartData::FeatureRanking { features: ranking },
    })
}

fn build_distributions(features: &[&Column], flags: Option<&[bool]>) -> Result<ChartSpec> {
    if features.len() < 2 {
        bail!(
            "Needs at least 2 numeric feature columns, found {}",
            features.len()
        );
    }
    let Some(flags) = flags else {
        bail!("No anomaly labels");
    };

    let distributions = features
        .iter()
        .take(DISTRIBUTION_FEATURE_LIMIT)
        .map(|column| {
            let mut normal = Vec::new();
            let mut anomalous = Vec::new();
            for (value, flagged) in column.f64_values().zip(flags) {
                let Some(v) = value else {
                    continue;
                };
                if *flagged {
                    anomalous.push(v);
                } else {
                    normal.push(v);
                }
            }
            FeatureDistribution {
                feature: column.name.clone(),
                normal,
                anomalous,
            }
        })
        .collect();

    Ok(ChartSpec {
        descriptor: "distributions".to_owned(),
        title: "Normal vs anomalous distributions".to_owned(),
        data: ChartData::Distributions {
            features: distributions,
        },
    })
}

fn build_health(total: usize, flags: Option<&[bool]>) -> ChartSpec {
    let anomaly_count = flags.map_or(0, |f| f.iter().filter(|v| **v).count());
    ChartSpec {
        descriptor: "health".to_owned(),
        title: "Dataset health".to_owned(),
        data: ChartData::HealthOverview {
            normal_count: total.saturating_sub(anomaly_count),
            anomaly_count,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_and_degenerate() {
        let r = pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap_or_default();
        assert!((r - 1.0).abs() < 1e-12, "Expected r=1, got {r}");

        let r = pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap_or_default();
        assert!((r + 1.0).abs() < 1e-12, "Expected r=-1, got {r}");

        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[0.0, 1.0, 0.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
    }
}
