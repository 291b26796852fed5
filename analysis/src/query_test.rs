use crate::{
    baseline::{BaselineDocument, BaselineEntry, BaselineKind, MetricBaseline, QueryBaseline},
    query::{build_response, group_statistics, prepare_chart_data, score_row, FilterRequest, GroupKey},
};
use chrono::NaiveDate;
use tsbs_report_ingest::RunRecord;

fn record(branch: &str, hour: u32, query_type: &str, mean_ms: f64, import_speed: f64) -> RunRecord {
    RunRecord {
        run_id: format!("{branch}-{hour}"),
        timestamp: NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(hour, 30, 15)
            .unwrap(),
        branch: branch.to_owned(),
        scale: 100,
        cluster: 3,
        worker: 8,
        phase: "query".to_owned(),
        query_type: query_type.to_owned(),
        min_ms: Some(mean_ms - 2.0),
        mean_ms: Some(mean_ms),
        max_ms: Some(mean_ms + 2.0),
        med_ms: Some(mean_ms),
        query_count: Some(1000.0),
        import_speed: Some(import_speed),
        test_type: None,
        wal: None,
        replica: None,
        dop: 8,
    }
}

#[test]
pub fn request_parsing() {
    let request: FilterRequest = serde_json::from_str(
        r#"{
            "branches": ["main"],
            "scales": ["100", 1000],
            "workers": [4, "eight"],
            "start_date": "2024-03-01",
            "end_date": "2024-03-15",
            "baseline_type": "enterprise"
        }"#,
    )
    .unwrap();
    let filter = request.row_filter();

    assert_eq!(filter.branches, Some(["main".to_owned()].into()));
    assert_eq!(filter.scales, Some([100, 1000].into()));
    assert_eq!(filter.workers, None);
    assert_eq!(filter.clusters, None);
    assert_eq!(
        filter.start,
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0)
    );
    assert_eq!(
        filter.end,
        NaiveDate::from_ymd_opt(2024, 3, 16).unwrap().and_hms_opt(0, 0, 0)
    );
    assert_eq!(request.metric(), "mean_ms");
    assert_eq!(request.baseline_kind(), BaselineKind::Enterprise);
}

#[test]
pub fn lenient_requests() {
    let request: FilterRequest = serde_json::from_str(
        r#"{"start_date": "yesterday", "query_types": [], "baseline_type": "nightly", "metric": ""}"#,
    )
    .unwrap();
    let filter = request.row_filter();

    assert_eq!(filter.start, None);
    assert_eq!(filter.query_types, None);
    assert_eq!(request.baseline_kind(), BaselineKind::Master);
    assert_eq!(request.metric(), "mean_ms");
    assert_eq!(serde_json::from_str::<FilterRequest>("{}").unwrap(), FilterRequest::default());
}

#[test]
pub fn end_date_includes_the_whole_day() {
    let request = FilterRequest {
        end_date: Some("2024-03-15".to_owned()),
        ..FilterRequest::default()
    };
    let filter = request.row_filter();

    assert!(filter.matches(&record("main", 23, "lastpoint", 1.0, 1.0)));
}

#[test]
pub fn chart_points_aggregate_by_timestamp() {
    let mut rows = vec![
        record("main", 10, "lastpoint", 4.0, 100.0),
        record("main", 10, "lastpoint", 8.0, 300.0),
        record("main", 12, "lastpoint", 5.0, 200.0),
        record("dev", 10, "lastpoint", 1.0, 50.0),
    ];
    rows[1].run_id = "main-10b".to_owned();

    let charts = prepare_chart_data(&rows, "mean_ms");
    let main = &charts["main_lastpoint"];

    assert_eq!(main.name, "main - lastpoint");
    assert_eq!(main.kind, "line");
    assert_eq!(
        main.data,
        vec![
            ("2024-03-15 10:30".to_owned(), 6.0),
            ("2024-03-15 12:30".to_owned(), 5.0)
        ]
    );
    assert_eq!(charts.len(), 2);

    let speeds = prepare_chart_data(&rows, "import_speed");
    assert_eq!(speeds["main_lastpoint"].data[0].1, 300.0);

    assert!(prepare_chart_data(&rows, "bogus").is_empty());
}

fn baselines() -> BaselineDocument {
    let entry = BaselineEntry {
        import_speed: Some(100.0),
        metrics: [(
            "cpu-max-all-1".to_owned(),
            MetricBaseline::Scoring(QueryBaseline {
                mean_ms: Some(10.0),
                med_ms: Some(10.0),
                std_ms: None,
                range_ms: Some(4.0),
            }),
        )]
        .into(),
    };

    [("100_3_query_8".to_owned(), entry)].into()
}

#[test]
pub fn rows_are_scored_against_their_configuration() {
    let rows = vec![record("main", 10, "CPU Max All 1", 10.0, 100.0)];
    let stats = group_statistics(&rows);
    let group = stats[&GroupKey::of(&rows[0])];

    let scores = score_row(&rows[0], &group, &baselines());

    assert_eq!(scores.mean_ms_baseline_pct, Some(0.0));
    assert_eq!(scores.import_speed_baseline_pct, Some(0.0));
    assert_eq!(scores.import_speed_score, Some(100.0));
    assert_eq!(scores.query_comprehensive_score, Some(100.0));
    assert_eq!(scores.query_std_score, None);
}

#[test]
pub fn rows_without_baseline_carry_no_scores() {
    let mut row = record("main", 10, "lastpoint", 10.0, 100.0);
    row.worker = 16;

    let response = build_response(&[row], &baselines(), "mean_ms", 10);
    let json = serde_json::to_value(&response.table_data[0]).unwrap();

    assert_eq!(json["datetime"], "2024-03-15 10:30:15");
    assert!(json.get("query_comprehensive_score").is_none());
    assert!(json.get("import_speed_score").is_none());
}

#[test]
pub fn table_is_limited_but_totals_are_not() {
    let rows = (0..5)
        .map(|hour| record("main", hour, "lastpoint", 1.0, 1.0))
        .collect::<Vec<_>>();

    let response = build_response(&rows, &BaselineDocument::new(), "mean_ms", 3);

    assert_eq!(response.table_data.len(), 3);
    assert_eq!(response.total_records, 5);
    assert_eq!(response.chart_data["main_lastpoint"].data.len(), 5);
}
