//! Integration tests for the full analysis workflow
//!
//! These run uploads through the complete pipeline and check the response,
//! the persisted summary and the chart artifacts.

use anyhow::Result;
use std::fmt::Write as _;
use std::sync::Arc;
use tabwatch::analyser::logic::{AnalysisPipeline, ChartRenderer, ChartSpec, HealthStatus};
use tabwatch::artifacts::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
use tabwatch::config::PipelineConfig;
use tabwatch::error::PipelineError;

/// 100 rows: a day column, two numeric features and one extreme amount.
fn spiky_csv() -> String {
    let mut csv = String::from("transaction_date,amount,quantity,region\n");
    for i in 0..100_u32 {
        let amount = if i == 42 {
            10_000.0
        } else {
            50.0 + (f64::from(i) * 0.37).sin() * 5.0
        };
        let _ = writeln!(
            csv,
            "2024-01-{:02},{amount:.4},{},r{}",
            i % 28 + 1,
            i % 7 + 1,
            i % 3
        );
    }
    csv
}

fn memory_pipeline() -> (AnalysisPipeline, Arc<MemoryArtifactStore>, Arc<MemoryArtifactStore>) {
    let insights = Arc::new(MemoryArtifactStore::new());
    let charts = Arc::new(MemoryArtifactStore::new());
    let pipeline = AnalysisPipeline::new(
        PipelineConfig::default(),
        insights.clone(),
        charts.clone(),
    );
    (pipeline, insights, charts)
}

struct StubRenderer;

impl ChartRenderer for StubRenderer {
    fn render(&self, spec: &ChartSpec) -> anyhow::Result<Vec<u8>> {
        Ok(format!("PNG:{}", spec.descriptor).into_bytes())
    }
}

/// Fails for the health chart only.
struct PickyRenderer;

impl ChartRenderer for PickyRenderer {
    fn render(&self, spec: &ChartSpec) -> anyhow::Result<Vec<u8>> {
        if spec.descriptor == "health" {
            anyhow::bail!("font missing");
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

#[test]
fn test_end_to_end_flags_extreme_row() -> Result<()> {
    let (pipeline, insights, _charts) = memory_pipeline();
    let response = pipeline.run("sales.csv", spiky_csv().as_bytes())?;

    let summary = &response.insights;
    assert_eq!(response.message, "File processed successfully");
    assert_eq!(summary.run_id, response.run_id);
    assert_eq!(summary.total_records, 100);
    assert!(summary.total_anomalies >= 1 && summary.total_anomalies <= summary.total_records);
    assert!((0.0..=100.0).contains(&summary.anomaly_percentage));
    assert!(summary.anomaly_meta.model_trained);
    assert_eq!(
        summary.preprocessing_meta.date_columns,
        vec!["transaction_date".to_owned()]
    );
    assert_eq!(
        summary.preprocessing_meta.numeric_columns,
        vec!["amount".to_owned(), "quantity".to_owned()]
    );

    // The extreme row must be among the flagged ones; the trend chart's
    // anomaly points carry the scaled amount, which dwarfs all others
    let trend = response
        .chart_data
        .iter()
        .find(|c| c.descriptor == "amount_trend")
        .expect("amount trend chart");
    let json = serde_json::to_value(trend)?;
    let max_anomaly = json["data"]["anomalies"]
        .as_array()
        .expect("anomaly points")
        .iter()
        .filter_map(|p| p["y"].as_f64())
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(max_anomaly > 5.0, "Extreme amount should be flagged, max z={max_anomaly}");

    assert_eq!(response.insight_file, format!("{}_insights.json", response.run_id));
    let stored = insights.get(&response.insight_file)?;
    let persisted: serde_json::Value = serde_json::from_slice(&stored)?;
    assert_eq!(persisted["total_records"], 100);
    Ok(())
}

#[test]
fn test_unsupported_format_rejected_before_loading() {
    let (pipeline, insights, _charts) = memory_pipeline();
    // The payload is valid CSV; only the name is wrong
    let err = pipeline.run("notes.txt", b"a,b\n1,2\n").err();
    assert!(
        matches!(err, Some(PipelineError::UnsupportedFormat(_))),
        "Expected UnsupportedFormat, got {err:?}"
    );
    assert!(insights.list().map(|l| l.is_empty()).unwrap_or(false));
}

#[test]
fn test_header_only_upload_is_empty_input() {
    let (pipeline, insights, _charts) = memory_pipeline();
    let err = pipeline.run("empty.csv", b"a,b,c\n").err();
    assert!(matches!(err, Some(PipelineError::EmptyInput)), "{err:?}");
    assert_eq!(err.map(|e| e.code()), Some("empty_input"));
    assert!(insights.list().map(|l| l.is_empty()).unwrap_or(false));
}

#[test]
fn test_text_only_upload_is_healthy_without_model() -> Result<()> {
    let (pipeline, _insights, _charts) = memory_pipeline();
    let response = pipeline.run("cities.csv", b"city,country\nOslo,NO\nLima,PE\n")?;

    assert!(!response.insights.anomaly_meta.model_trained);
    assert_eq!(response.insights.total_anomalies, 0);
    assert_eq!(response.insights.anomaly_percentage, 0.0);
    assert_eq!(response.insights.health_status(), HealthStatus::Healthy);
    assert!(response.chart_data.iter().any(|c| c.descriptor == "health"));
    assert!(!response.skipped_charts.is_empty());
    Ok(())
}

#[test]
fn test_without_renderer_no_images_are_written() -> Result<()> {
    let (pipeline, _insights, charts) = memory_pipeline();
    let response = pipeline.run("sales.csv", spiky_csv().as_bytes())?;
    assert!(response.charts.is_empty());
    assert!(charts.list()?.is_empty());
    assert!(!response.chart_data.is_empty());
    Ok(())
}

#[test]
fn test_rendered_charts_are_named_by_run() -> Result<()> {
    let (pipeline, _insights, charts) = memory_pipeline();
    let pipeline = pipeline.with_renderer(Arc::new(StubRenderer));
    let response = pipeline.run("sales.csv", spiky_csv().as_bytes())?;

    let health = format!("{}_health.png", response.run_id);
    assert!(response.charts.contains(&health), "{:?}", response.charts);
    assert!(
        response
            .charts
            .iter()
            .all(|c| c.starts_with(&response.run_id) && c.ends_with(".png"))
    );
    assert_eq!(charts.get(&health)?, b"PNG:health");
    assert_eq!(charts.list()?.len(), response.charts.len());
    Ok(())
}

#[test]
fn test_render_failure_skips_only_that_chart() -> Result<()> {
    let (pipeline, _insights, _charts) = memory_pipeline();
    let pipeline = pipeline.with_renderer(Arc::new(PickyRenderer));
    let response = pipeline.run("sales.csv", spiky_csv().as_bytes())?;

    assert!(
        response
            .skipped_charts
            .iter()
            .any(|s| s.chart == "health" && s.reason.contains("font missing"))
    );
    assert!(
        response
            .charts
            .contains(&format!("{}_amount_trend.png", response.run_id))
    );
    Ok(())
}

#[test]
fn test_filesystem_stores() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let insights = Arc::new(FsArtifactStore::new(dir.path().join("insights"))?);
    let charts = Arc::new(FsArtifactStore::new(dir.path().join("charts"))?);
    let pipeline = AnalysisPipeline::new(PipelineConfig::default(), insights, charts)
        .with_renderer(Arc::new(StubRenderer));

    let response = pipeline.run("sales.csv", spiky_csv().as_bytes())?;

    let summary_path = dir.path().join("insights").join(&response.insight_file);
    let persisted: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(summary_path)?)?;
    assert_eq!(persisted["run_id"], response.run_id.as_str());
    for chart in &response.charts {
        assert!(dir.path().join("charts").join(chart).is_file(), "{chart} missing");
    }
    Ok(())
}

#[test]
fn test_unwritable_insight_store_is_persistence_failure() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let insights_dir = dir.path().join("insights");
    let insights = Arc::new(FsArtifactStore::new(&insights_dir)?);
    // Directory disappears after the store was created
    std::fs::remove_dir_all(&insights_dir)?;

    let pipeline = AnalysisPipeline::new(
        PipelineConfig::default(),
        insights,
        Arc::new(MemoryArtifactStore::new()),
    );
    let err = pipeline.run("sales.csv", spiky_csv().as_bytes()).err();
    assert!(
        matches!(err, Some(PipelineError::PersistenceFailure(_))),
        "Expected PersistenceFailure, got {err:?}"
    );
    Ok(())
}

#[test]
fn test_extreme_finite_values_complete_the_run() -> Result<()> {
    let (pipeline, _insights, _charts) = memory_pipeline();
    let response = pipeline.run("big.csv", b"x\n-1.7e308\n1.7e308\n0.0\n1.0\n2.0\n")?;

    assert_eq!(response.insights.total_records, 5);
    assert!(response.insights.anomaly_meta.model_trained);

    let trend = response
        .chart_data
        .iter()
        .find(|c| c.descriptor == "x_trend")
        .expect("x trend chart");
    let json = serde_json::to_value(trend)?;
    let points = json["data"]["points"].as_array().expect("trend points");
    assert_eq!(points.len(), 5);
    assert!(
        points
            .iter()
            .all(|p| p["y"].as_f64().is_some_and(f64::is_finite)),
        "Scaled values must stay finite: {points:?}"
    );
    Ok(())
}

#[test]
fn test_same_seed_same_result() -> Result<()> {
    let (pipeline, _insights, _charts) = memory_pipeline();
    let a = pipeline.run("sales.csv", spiky_csv().as_bytes())?;
    let b = pipeline.run("sales.csv", spiky_csv().as_bytes())?;

    assert_ne!(a.run_id, b.run_id, "Every run gets a fresh id");
    assert_eq!(a.insights.total_anomalies, b.insights.total_anomalies);
    assert_eq!(
        serde_json::to_value(&a.chart_data)?,
        serde_json::to_value(&b.chart_data)?
    );
    Ok(())
}

#[test]
fn test_invalid_contamination_is_config_error() {
    let config = PipelineConfig {
        contamination: 0.9,
        ..Default::default()
    };
    let pipeline = AnalysisPipeline::new(
        config,
        Arc::new(MemoryArtifactStore::new()),
        Arc::new(MemoryArtifactStore::new()),
    );
    let err = pipeline.run("sales.csv", spiky_csv().as_bytes()).err();
    assert!(matches!(err, Some(PipelineError::Config(_))), "{err:?}");
}
