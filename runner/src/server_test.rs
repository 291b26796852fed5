use crate::{
    config::ServerConfig,
    server::{app, ServiceState},
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use std::{fs, path::Path, sync::Arc};
use tower::ServiceExt;
use tsbs_report_analysis::{BaselineKind, BaselineStore};
use tsbs_report_ingest::{CacheConfig, LayoutConfig, LoaderConfig, ReportLoader, WatchConfig};

const RUN: &str = "2025_0601_120000_master_scale100_cluster1_querytype_insert_wal1_replica1_dop4";

fn router(base: &Path) -> Router {
    let run_dir = base.join("runs").join(RUN);
    fs::create_dir_all(run_dir.join("query_result")).unwrap();
    fs::write(
        run_dir.join("query_result/TSBS_TEST_RESULT.csv"),
        "query_type,min_ms,mean_ms,max_ms,med_ms\ncpu-max-all-1,40,50,80,45\nlastpoint,1,2,3,2\n",
    )
    .unwrap();

    let loader = ReportLoader::new(LoaderConfig {
        layout: LayoutConfig {
            path: base.join("runs"),
            ..LayoutConfig::default()
        },
        watch: WatchConfig {
            enabled: false,
            ..WatchConfig::default()
        },
        cache: CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        },
        retention_days: None,
    })
    .unwrap();
    loader.bulk_load();

    app(ServiceState::new(
        Arc::new(loader),
        BaselineStore::new(base.join("baselines")),
        &ServerConfig::default(),
    ))
}

fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn response_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();

    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_the_loaded_dataset() {
    let dir = tempfile::tempdir().unwrap();

    let response = router(dir.path())
        .oneshot(request("GET", "/health", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = response_json(response).await;
    assert_eq!(value["loaded"], true);
    assert_eq!(value["runs"], 1);
    assert_eq!(value["records"], 2);
}

#[tokio::test]
async fn options_and_filtered_data() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());

    let options = router
        .clone()
        .oneshot(request("GET", "/options", Body::empty()))
        .await
        .unwrap();
    let options = response_json(options).await;
    assert_eq!(options["branches"], serde_json::json!(["master"]));
    assert_eq!(options["workers"], serde_json::json!([4]));
    assert_eq!(options["execution_types"], serde_json::json!(["insert"]));

    let data = router
        .oneshot(request(
            "POST",
            "/data",
            r#"{"branches": ["master"], "scales": ["100"], "start_date": "not a date"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(data.status(), StatusCode::OK);
    let data = response_json(data).await;
    assert_eq!(data["total_records"], 2);
    assert_eq!(data["table_data"].as_array().unwrap().len(), 2);
    assert!(data["chart_data"]["master_lastpoint"].is_object());
}

#[tokio::test]
async fn malformed_filter_is_a_structured_error() {
    let dir = tempfile::tempdir().unwrap();

    let response = router(dir.path())
        .oneshot(request("POST", "/data", "{"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = response_json(response).await;
    assert_eq!(value["error"]["code"], "invalid_json");
}

#[tokio::test]
async fn baseline_documents_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    fs::create_dir_all(dir.path().join("baselines")).unwrap();

    let empty = router
        .clone()
        .oneshot(request("GET", "/baselines/enterprise", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response_json(empty).await, serde_json::json!({}));

    let saved = router
        .clone()
        .oneshot(request(
            "POST",
            "/baselines/enterprise",
            r#"{"100_1_insert_4": {"import_speed": 1500000, "lastpoint": 2.0}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(saved.status(), StatusCode::OK);
    assert!(BaselineStore::new(dir.path().join("baselines"))
        .available()
        .contains(&BaselineKind::Enterprise));

    let loaded = router
        .clone()
        .oneshot(request("GET", "/baselines/enterprise", Body::empty()))
        .await
        .unwrap();
    assert_eq!(
        response_json(loaded).await["100_1_insert_4"]["lastpoint"],
        2.0
    );

    let unknown = router
        .oneshot(request("GET", "/baselines/nightly", Body::empty()))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn csv_upload_replaces_or_merges() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    fs::create_dir_all(dir.path().join("baselines")).unwrap();

    let uploaded = router
        .clone()
        .oneshot(request(
            "POST",
            "/baselines/master/upload",
            "Scale,Cluster,Execution Type,Workers,Import Speed,lastpoint\n100,1,insert,4,1000,2.5\n",
        ))
        .await
        .unwrap();
    assert_eq!(uploaded.status(), StatusCode::OK);
    assert_eq!(response_json(uploaded).await["configurations"], 1);

    let merged = router
        .clone()
        .oneshot(request(
            "POST",
            "/baselines/master/upload?merge=true",
            "Scale,Cluster,Execution Type,Workers,cpu-max-all-1\n100,1,insert,4,48\n",
        ))
        .await
        .unwrap();
    let merged = response_json(merged).await;
    assert_eq!(merged["added_configurations"], 0);
    assert_eq!(merged["updated_values"], 1);

    let broken = router
        .oneshot(request("POST", "/baselines/master/upload", ""))
        .await
        .unwrap();
    assert_eq!(broken.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(broken).await["error"]["code"], "invalid_csv");
}
