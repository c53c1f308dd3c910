use super::*;
use crate::analyser::logic::charts::ChartX;
use anyhow::Result;

fn outcome<'a>(outcomes: &'a [ChartOutcome], descriptor: &str) -> &'a ChartOutcome {
    outcomes
        .iter()
        .find(|o| o.descriptor() == descriptor)
        .unwrap_or_else(|| panic!("No outcome for {descriptor}"))
}

fn ready<'a>(outcomes: &'a [ChartOutcome], descriptor: &str) -> &'a ChartData {
    &outcome(outcomes, descriptor)
        .ready()
        .unwrap_or_else(|| panic!("{descriptor} should be ready"))
        .data
}

fn timed_dataset() -> Result<Dataset> {
    Ok(Dataset::new(vec![
        Column::new(
            "day",
            vec![
                Value::Timestamp(ts(2024, 3, 1, 8)),
                Value::Timestamp(ts(2024, 3, 1, 17)),
                Value::Missing,
                Value::Timestamp(ts(2024, 3, 2, 9)),
            ],
        ),
        numeric("amount", &[1.0, 2.0, 3.0, 40.0]),
        numeric("qty", &[5.0, 5.0, 6.0, 1.0]),
        flags(&[0, 1, 1, 1]),
    ])?)
}

#[test]
fn test_trend_uses_timestamp_x_for_all_points() -> Result<()> {
    let outcomes = select_chart_data(&timed_dataset()?, &ChartConfig::default());

    let ChartData::Trend {
        x_column,
        points,
        anomalies,
        ..
    } = ready(&outcomes, "amount_trend")
    else {
        panic!("amount_trend should be a trend chart");
    };

    assert_eq!(x_column.as_deref(), Some("day"));
    assert_eq!(points.len(), 3, "Row with missing x is skipped");
    assert_eq!(points[0].x, ChartX::Time(ts(2024, 3, 1, 8)));
    assert_eq!(
        anomalies
            .iter()
            .map(|p| (p.x, p.y))
            .collect::<Vec<_>>(),
        vec![
            (ChartX::Time(ts(2024, 3, 1, 17)), 2.0),
            (ChartX::Time(ts(2024, 3, 2, 9)), 40.0)
        ],
        "Anomaly points share the x axis of the series"
    );
    Ok(())
}

#[test]
fn test_trend_falls_back_to_row_index() -> Result<()> {
    let ds = Dataset::new(vec![numeric("v", &[3.0, 4.0, 5.0]), flags(&[0, 0, 1])])?;
    let outcomes = select_chart_data(&ds, &ChartConfig::default());

    let ChartData::Trend {
        x_column,
        points,
        anomalies,
        ..
    } = ready(&outcomes, "v_trend")
    else {
        panic!("v_trend should be a trend chart");
    };
    assert!(x_column.is_none());
    assert_eq!(points[2].x, ChartX::Index(2));
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].x, ChartX::Index(2));
    Ok(())
}

#[test]
fn test_trend_count_is_capped() -> Result<()> {
    let mut columns: Vec<Column> = (0..8)
        .map(|i| numeric(&format!("f{i}"), &[1.0, 2.0, f64::from(i)]))
        .collect();
    columns.push(flags(&[0, 0, 1]));
    let ds = Dataset::new(columns)?;

    let outcomes = select_chart_data(&ds, &ChartConfig { max_trend_charts: 3 });
    let trends: Vec<&str> = outcomes
        .iter()
        .map(ChartOutcome::descriptor)
        .filter(|d| d.ends_with("_trend"))
        .collect();
    assert_eq!(trends, vec!["f0_trend", "f1_trend", "f2_trend"]);
    Ok(())
}

#[test]
fn test_anomaly_timeline_counts_per_day() -> Result<()> {
    let outcomes = select_chart_data(&timed_dataset()?, &ChartConfig::default());
    let ChartData::AnomalyTimeline {
        timestamp_column,
        counts,
    } = ready(&outcomes, "anomaly_time")
    else {
        panic!("anomaly_time should be a timeline");
    };

    assert_eq!(timestamp_column, "day");
    let counts: Vec<(NaiveDate, usize)> = counts.iter().map(|c| (c.date, c.count)).collect();
    assert_eq!(
        counts,
        vec![
            (ts(2024, 3, 1, 0).date(), 1),
            (ts(2024, 3, 2, 0).date(), 1)
        ]
    );
    Ok(())
}

#[test]
fn test_anomaly_timeline_needs_a_timestamp_column() -> Result<()> {
    let ds = Dataset::new(vec![numeric("v", &[3.0, 4.0]), flags(&[0, 1])])?;
    let outcomes = select_chart_data(&ds, &ChartConfig::default());
    let skipped = outcome(&outcomes, "anomaly_time").skipped();
    assert!(
        skipped.is_some_and(|s| s.reason.contains("timestamp")),
        "anomaly_time should be skipped without a timestamp column"
    );
    Ok(())
}

#[test]
fn test_feature_ranking_sorted_and_excludes_labels() -> Result<()> {
    let ds = Dataset::new(vec![
        numeric("noise", &[1.0, 3.0, 2.0, 3.0, 1.0, 2.0]),
        numeric("flat", &[2.0; 6]),
        numeric("signal", &[0.0, 0.1, 0.0, 0.1, 9.0, 9.5]),
        flags(&[0, 0, 0, 0, 1, 1]),
    ])?;
    let outcomes = select_chart_data(&ds, &ChartConfig::default());

    let ChartData::FeatureRanking { features } = ready(&outcomes, "feature_ranking") else {
        panic!("feature_ranking should be a ranking");
    };
    let names: Vec<&str> = features.iter().map(|f| f.feature.as_str()).collect();
    assert_eq!(names.first(), Some(&"signal"));
    assert_eq!(features.len(), 3, "Label columns are not ranked");
    assert!(
        features
            .windows(2)
            .all(|w| w[0].correlation >= w[1].correlation),
        "Ranking must be descending"
    );
    let flat = features.iter().find(|f| f.feature == "flat").unwrap();
    assert_eq!(flat.correlation, 0.0, "Zero-variance feature scores 0");
    Ok(())
}

#[test]
fn test_distributions_split_by_label() -> Result<()> {
    let outcomes = select_chart_data(&timed_dataset()?, &ChartConfig::default());
    let ChartData::Distributions { features } = ready(&outcomes, "distributions") else {
        panic!("distributions should be ready");
    };
    assert_eq!(features.len(), 2);
    assert_eq!(features[0].feature, "amount");
    assert_eq!(features[0].normal, vec![1.0]);
    assert_eq!(features[0].anomalous, vec![2.0, 3.0, 40.0]);
    Ok(())
}

#[test]
fn test_distributions_need_two_features() -> Result<()> {
    let ds = Dataset::new(vec![numeric("v", &[3.0, 4.0]), flags(&[0, 1])])?;
    let outcomes = select_chart_data(&ds, &ChartConfig::default());
    assert!(outcome(&outcomes, "distributions").ready().is_none());
    Ok(())
}

#[test]
fn test_health_always_ready() -> Result<()> {
    // No numeric columns, no labels: everything else is skipped
    let ds = Dataset::new(vec![text("city", &["Oslo", "Lima", "Pune"])])?;
    let outcomes = select_chart_data(&ds, &ChartConfig::default());

    assert_eq!(
        ready(&outcomes, "health"),
        &ChartData::HealthOverview {
            normal_count: 3,
            anomaly_count: 0
        }
    );
    let ready_count = outcomes.iter().filter(|o| o.ready().is_some()).count();
    assert_eq!(ready_count, 1);
    Ok(())
}

#[test]
fn test_health_counts_flags() -> Result<()> {
    let outcomes = select_chart_data(&timed_dataset()?, &ChartConfig::default());
    assert_eq!(
        ready(&outcomes, "health"),
        &ChartData::HealthOverview {
            normal_count: 1,
            anomaly_count: 3
        }
    );
    Ok(())
}
