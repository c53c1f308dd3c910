use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::charts::{ChartOutcome, ChartSpec, SkippedChart, select_chart_data};
use super::cleaning::preprocess_dataset;
use super::health::{generate_insights, insight_file_name};
use super::io::{SourceFormat, load_dataset};
use super::ml::detect_anomalies;
use super::types::RunSummary;
use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Turns a chart specification into image bytes (PNG).
pub trait ChartRenderer: Send + Sync {
    fn render(&self, spec: &ChartSpec) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub message: String,
    pub run_id: String,
    pub insights: RunSummary,
    /// Bare name of the persisted summary document.
    pub insight_file: String,
    /// Bare names of rendered chart images, `<run_id>_<descriptor>.png`.
    pub charts: Vec<String>,
    pub skipped_charts: Vec<SkippedChart>,
    /// Chart data for every chart that could be built, rendered or not.
    pub chart_data: Vec<ChartSpec>,
}

pub fn chart_file_name(run_id: &str, descriptor: &str) -> String {
    format!("{run_id}_{descriptor}.png")
}

/// Runs uploads through load, preprocess, detect, summarize and chart
/// selection.
///
/// A run is synchronous and owns its data from start to finish. Several runs
/// may share one pipeline (and its stores) across threads; artifact names are
/// namespaced by run id so they never collide. An
/// [`ArtifactJanitor`](crate::artifacts::ArtifactJanitor) sweeping the same
/// stores is not coordinated with in-flight runs.
pub struct AnalysisPipeline {
    config: PipelineConfig,
    insights: Arc<dyn ArtifactStore>,
    charts: Arc<dyn ArtifactStore>,
    renderer: Option<Arc<dyn ChartRenderer>>,
}

impl AnalysisPipeline {
    pub fn new(
        config: PipelineConfig,
        insights: Arc<dyn ArtifactStore>,
        charts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            insights,
            charts,
            renderer: None,
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Analyzes one upload under a fresh run id.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` is raised from the file name alone, before any
    /// bytes are parsed. Loading can fail with `UnreadableInput` or
    /// `EmptyInput`; storing the summary with `PersistenceFailure`. Chart
    /// problems never fail a run.
    pub fn run(&self, filename: &str, bytes: &[u8]) -> Result<RunResponse> {
        let format = SourceFormat::from_filename(filename)?;
        self.config.validate()?;
        let run_id = Uuid::new_v4().to_string();
        self.run_with_id(&run_id, format, bytes)
    }

    /// Reads a file from disk and analyzes it.
    pub fn run_path(&self, path: &Path) -> Result<RunResponse> {
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let format = SourceFormat::from_filename(filename)?;
        self.config.validate()?;
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::UnreadableInput(format!("{}: {e}", path.display()))
        })?;
        let run_id = Uuid::new_v4().to_string();
        self.run_with_id(&run_id, format, &bytes)
    }

    fn run_with_id(&self, run_id: &str, format: SourceFormat, bytes: &[u8]) -> Result<RunResponse> {
        let start = Instant::now();
        tracing::info!(
            "Run {run_id}: analyzing {} bytes of {} input",
            bytes.len(),
            format.extension()
        );

        let raw = load_dataset(bytes, format)?;
        let preprocessed = preprocess_dataset(raw);
        let detected = detect_anomalies(preprocessed.dataset, &self.config.detector_config())?;

        let report = generate_insights(
            &detected.dataset,
            run_id,
            detected.meta,
            preprocessed.meta,
            self.insights.as_ref(),
            self.config.health_threshold_pct,
        )?;

        let outcomes = select_chart_data(&detected.dataset, &self.config.chart_config());
        let (charts, skipped_charts, chart_data) = self.publish_charts(run_id, outcomes);

        tracing::info!(
            "Run {run_id} finished in {:?}: {} charts written, {} skipped",
            start.elapsed(),
            charts.len(),
            skipped_charts.len()
        );

        Ok(RunResponse {
            message: "File processed successfully".to_owned(),
            run_id: run_id.to_owned(),
            insights: report.summary,
            insight_file: insight_file_name(run_id),
            charts,
            skipped_charts,
            chart_data,
        })
    }

    /// Renders and stores ready charts. Render or store failures turn the
    /// chart into a skipped one.
    fn publish_charts(
        &self,
        run_id: &str,
        outcomes: Vec<ChartOutcome>,
    ) -> (Vec<String>, Vec<SkippedChart>, Vec<ChartSpec>) {
        let mut written = Vec::new();
        let mut skipped = Vec::new();
        let mut specs = Vec::new();

        for outcome in outcomes {
            let spec = match outcome {
                ChartOutcome::Ready(spec) => spec,
                ChartOutcome::Skipped { chart, reason } => {
                    skipped.push(SkippedChart { chart, reason });
                    continue;
                }
            };

            if let Some(renderer) = &self.renderer {
                let name = chart_file_name(run_id, &spec.descriptor);
                let stored = renderer
                    .render(&spec)
                    .and_then(|png| self.charts.put(&name, &png));
                match stored {
                    Ok(_) => written.push(name),
                    Err(e) => {
                        tracing::warn!("Chart '{}' not written: {e:#}", spec.descriptor);
                        skipped.push(SkippedChart {
                            chart: spec.descriptor.clone(),
                            reason: format!("Rendering failed: {e:#}"),
                        });
                    }
                }
            }
            specs.push(spec);
        }

        (written, skipped, specs)
    }
}
