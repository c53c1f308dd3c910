use anyhow::{Result, anyhow};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng as _;
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::types::{
    ANOMALY_COLUMN, AnomalyLabel, Column, ColumnKind, Dataset, DetectorMeta, IS_ANOMALY_COLUMN,
    Value,
};

/// Euler-Mascheroni constant, used for the harmonic number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Expected share of anomalous rows.
    pub contamination: f64,
    pub random_seed: u64,
    pub n_estimators: usize,
    /// Upper bound on the sub-sample drawn for each tree.
    pub max_samples: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            random_seed: 42,
            n_estimators: 100,
            max_samples: 256,
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` nodes; normalizes isolation depths.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum IsolationTree {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsolationTree>,
        right: Box<IsolationTree>,
    },
}

impl IsolationTree {
    fn build(
        data: &ArrayView2<'_, f64>,
        indices: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> Self {
        if depth >= max_depth || indices.len() <= 1 {
            return Self::Leaf {
                size: indices.len(),
            };
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..data.ncols())
            .filter_map(|feature| {
                let (min, max) = indices.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), &row| {
                        let v = data[[row, feature]];
                        (lo.min(v), hi.max(v))
                    },
                );
                (max > min).then_some((feature, min, max))
            })
            .collect();

        if candidates.is_empty() {
            return Self::Leaf {
                size: indices.len(),
            };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        // Halved span stays finite even when max - min overflows.
        let half_span = max / 2.0 - min / 2.0;
        let u: f64 = rng.gen_range(0.0..1.0);
        let threshold = min + u * half_span + u * half_span;

        let mut boundary = 0;
        for i in 0..indices.len() {
            if data[[indices[i], feature]] < threshold {
                indices.swap(boundary, i);
                boundary += 1;
            }
        }
        let (left, right) = indices.split_at_mut(boundary);

        Self::Split {
            feature,
            threshold,
            left: Box::new(Self::build(data, left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build(data, right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, sample: &ArrayView1<'_, f64>) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                Self::Leaf { size } => return depth + average_path_length(*size),
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold {
                        left
                    } else {
                        right
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Ensemble of random isolation trees fitted on sub-samples of the rows.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fits `n_estimators` trees, each on at most `max_samples` rows drawn
    /// without replacement.
    pub fn fit(
        data: ArrayView2<'_, f64>,
        n_estimators: usize,
        max_samples: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let n_rows = data.nrows();
        if n_rows < 2 {
            return Err(anyhow!("Isolation forest needs at least 2 rows, got {n_rows}"));
        }
        if data.ncols() == 0 {
            return Err(anyhow!("Isolation forest needs at least one feature"));
        }

        let sample_size = max_samples.clamp(2, n_rows);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..n_estimators.max(1))
            .map(|_| {
                let mut indices = index::sample(rng, n_rows, sample_size).into_vec();
                IsolationTree::build(&data, &mut indices, 0, max_depth, rng)
            })
            .collect();

        Ok(Self { trees, sample_size })
    }

    /// Anomaly score per row in `(0, 1]`; higher is more anomalous.
    pub fn score_samples(&self, data: ArrayView2<'_, f64>) -> Array1<f64> {
        let norm = average_path_length(self.sample_size);
        data.rows()
            .into_iter()
            .map(|row| {
                let mean_depth = self.trees.iter().map(|t| t.path_length(&row)).sum::<f64>()
                    / self.trees.len() as f64;
                2f64.powf(-mean_depth / norm)
            })
            .collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// Linear-interpolated percentile, `q` in `[0, 100]`.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let lo = *sorted.get(lower)?;
    let hi = *sorted.get(upper)?;
    Some(lo + (hi - lo) * (rank - lower as f64))
}

/// Labels rows whose score lies beyond the contamination quantile.
///
/// The offset is the `contamination` percentile of the negated scores; a row
/// is anomalous when its negated score is strictly below it.
pub fn label_by_contamination(scores: &[f64], contamination: f64) -> Vec<AnomalyLabel> {
    let negated: Vec<f64> = scores.iter().map(|s| -s).collect();
    let Some(offset) = percentile(&negated, contamination * 100.0) else {
        return Vec::new();
    };
    negated
        .iter()
        .map(|s| {
            if *s < offset {
                AnomalyLabel::Anomaly
            } else {
                AnomalyLabel::Normal
            }
        })
        .collect()
}

/// Builds the row-major feature matrix; non-numeric cells read as 0.
pub fn feature_matrix(dataset: &Dataset, features: &[String]) -> Array2<f64> {
    let columns: Vec<&Column> = features
        .iter()
        .filter_map(|name| dataset.column(name))
        .collect();
    Array2::from_shape_fn((dataset.height(), columns.len()), |(row, col)| {
        columns
            .get(col)
            .and_then(|c| c.values.get(row))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    })
}

#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub dataset: Dataset,
    pub meta: DetectorMeta,
}

/// Scores every row of the cleaned dataset and appends the `anomaly` and
/// `is_anomaly` columns.
///
/// With no numeric features (or fewer than two rows) no model is trained and
/// every row is labeled normal.
pub fn detect_anomalies(
    dataset: Dataset,
    config: &DetectorConfig,
) -> crate::error::Result<DetectionOutput> {
    let start = Instant::now();
    let mut dataset = dataset;
    let features: Vec<String> = dataset
        .feature_columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let n_samples = dataset.height();

    let trained = if features.is_empty() {
        tracing::info!("No numeric features available; skipping anomaly model");
        None
    } else {
        let x = feature_matrix(&dataset, &features);
        let mut rng = StdRng::seed_from_u64(config.random_seed);
        match IsolationForest::fit(x.view(), config.n_estimators, config.max_samples, &mut rng) {
            Ok(forest) => {
                let scores = forest.score_samples(x.view()).to_vec();
                Some(label_by_contamination(&scores, config.contamination))
            }
            Err(e) => {
                tracing::warn!("Anomaly model not trained: {e}");
                None
            }
        }
    };

    let model_trained = trained.is_some();
    let labels = trained.unwrap_or_else(|| vec![AnomalyLabel::Normal; n_samples]);
    let n_anomalies = labels
        .iter()
        .filter(|l| **l == AnomalyLabel::Anomaly)
        .count();

    dataset.upsert_column(Column::with_kind(
        ANOMALY_COLUMN,
        ColumnKind::Numeric,
        labels.iter().map(|l| Value::Int(l.signed())).collect(),
    ))?;
    dataset.upsert_column(Column::with_kind(
        IS_ANOMALY_COLUMN,
        ColumnKind::Numeric,
        labels.iter().map(|l| Value::Int(l.flag())).collect(),
    ))?;

    tracing::info!(
        "Anomaly detection over {n_samples} rows and {} features flagged {n_anomalies} rows in {:?}",
        features.len(),
        start.elapsed()
    );

    Ok(DetectionOutput {
        dataset,
        meta: DetectorMeta {
            numeric_features_used: features,
            model_trained,
            contamination: config.contamination,
            random_seed: config.random_seed,
            n_samples,
            n_anomalies,
        },
    })
}
