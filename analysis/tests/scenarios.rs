use std::fs;
use tsbs_report_analysis::{
    query::{build_response, run_query, FilterValue, GroupStats},
    score::{composite_query_score, QueryStats},
    BaselineDocument, BaselineKind, BaselineStore, FilterRequest,
};
use tsbs_report_ingest::{DatasetStore, LayoutConfig, RunIngestor};

const RUN: &str = "2025_0601_120000_master_scale100_cluster1_querytype_insert_wal1_replica1_dop4";

const BASELINE: &str = r#"{
    "100_1_insert_4": {
        "import_speed": 1600000,
        "cpu-max-all-1": {"mean_ms": 48, "med_ms": 44, "std_ms": 9.5, "range_ms": 38}
    }
}"#;

fn ingested_store(base: &std::path::Path) -> DatasetStore {
    let run_dir = base.join(RUN);
    fs::create_dir_all(run_dir.join("query_result")).unwrap();
    fs::create_dir_all(run_dir.join("load_result")).unwrap();
    fs::write(
        run_dir.join("query_result/TSBS_TEST_RESULT.csv"),
        "Query Type,Min(ms),Mean(ms),Max(ms),Med(ms)\n\
         cpu-max-all-1,40,50,80,45\n\
         lastpoint,1,2,3,2\n",
    )
    .unwrap();
    fs::write(
        run_dir.join("load_result/tsbs_load.log"),
        "loaded 1000 rows\nactually rate 1500000.00 rows/sec without ddl time\n",
    )
    .unwrap();

    let store = DatasetStore::new();
    let ingestor = RunIngestor::new(&LayoutConfig::default()).unwrap();
    assert!(ingestor.ingest(&store, &run_dir));

    store
}

#[test]
pub fn end_to_end_ingest_and_filter() {
    let data = tempfile::tempdir().unwrap();
    let store = ingested_store(data.path());

    let rows = store.get_data();
    assert_eq!(rows.len(), 2);
    for row in rows.iter() {
        assert_eq!(row.branch, "master");
        assert_eq!(row.scale, 100);
        assert_eq!(row.cluster, 1);
        assert_eq!(row.phase, "insert");
        assert_eq!(row.worker, 4);
        assert_eq!(row.import_speed, Some(1_500_000.0));
    }

    let request = FilterRequest {
        branches: Some(vec![FilterValue::Text("master".to_owned())]),
        scales: Some(vec![FilterValue::Text("100".to_owned())]),
        ..FilterRequest::default()
    };
    let baselines = tempfile::tempdir().unwrap();
    let response = run_query(&store, &BaselineStore::new(baselines.path()), &request, 1000);

    assert_eq!(response.total_records, 2);
    assert_eq!(response.table_data.len(), 2);

    let other_branch = FilterRequest {
        branches: Some(vec![FilterValue::Text("dev".to_owned())]),
        ..FilterRequest::default()
    };
    let response = run_query(&store, &BaselineStore::new(baselines.path()), &other_branch, 1000);
    assert_eq!(response.total_records, 0);
}

#[test]
pub fn observed_statistics_close_to_baseline_score_full_marks() {
    let document: BaselineDocument = serde_json::from_str(BASELINE).unwrap();
    let baseline = document["100_1_insert_4"].query_baseline("cpu-max-all-1").unwrap();
    let observed = QueryStats {
        mean_ms: 50.0,
        med_ms: 45.0,
        std_ms: 10.0,
        range_ms: 40.0,
    };

    let score = composite_query_score(&observed, &baseline).unwrap();

    assert_eq!(score.mean, Some(100.0));
    assert_eq!(score.median, Some(100.0));
    assert_eq!(score.std, Some(100.0));
    assert_eq!(score.range, Some(100.0));
    assert_eq!(score.comprehensive, 100.0);
    assert_eq!(GroupStats::default().query, None);
}

#[test]
pub fn selected_baseline_scores_the_table() {
    let data = tempfile::tempdir().unwrap();
    let store = ingested_store(data.path());
    let baselines = tempfile::tempdir().unwrap();
    let baseline_store = BaselineStore::new(baselines.path());
    assert!(baseline_store.save(BaselineKind::Enterprise, &serde_json::from_str(BASELINE).unwrap()));

    let request = FilterRequest {
        query_types: Some(vec![FilterValue::Text("cpu-max-all-1".to_owned())]),
        baseline_type: Some("enterprise".to_owned()),
        ..FilterRequest::default()
    };
    let response = run_query(&store, &baseline_store, &request, 1000);
    let row = serde_json::to_value(&response.table_data[0]).unwrap();

    // 1.5M against 1.6M rows/sec
    assert_eq!(row["import_speed_baseline_pct"], -6.25);
    let import_score = row["import_speed_score"].as_f64().unwrap();
    assert!((91.8..=91.9).contains(&import_score));
    assert_eq!(row["mean_ms_baseline_pct"], -4.17);
    assert!(row.get("query_comprehensive_score").is_some());

    let master = run_query(&store, &baseline_store, &FilterRequest::default(), 1000);
    let row = serde_json::to_value(&master.table_data[0]).unwrap();
    assert!(row.get("import_speed_score").is_none());
}

#[test]
pub fn missing_baseline_leaves_score_fields_out() {
    let data = tempfile::tempdir().unwrap();
    let store = ingested_store(data.path());

    let response = build_response(&store.get_data(), &BaselineDocument::new(), "mean_ms", 1000);
    let json = serde_json::to_value(&response).unwrap();

    for row in json["table_data"].as_array().unwrap() {
        for field in [
            "import_speed_baseline_pct",
            "import_speed_score",
            "query_comprehensive_score",
            "query_mean_score",
            "query_median_score",
            "query_std_score",
            "query_range_score",
            "mean_ms_baseline_pct",
        ] {
            assert!(row.get(field).is_none(), "{field} should be absent");
        }
    }
    assert_eq!(json["chart_data"]["master_cpu-max-all-1"]["type"], "line");
}
