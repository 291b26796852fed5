use crate::baseline::{
    merge_documents, BaselineDocument, BaselineEntry, BaselineKind, BaselineStore, MetricBaseline,
    QueryBaseline,
};
use std::fs;
use tempfile::TempDir;

const DOCUMENT: &str = r#"{
    "100_1_insert_1": {
        "import_speed": 1600000,
        "cpu-max-all-1": {"mean_ms": 48, "med_ms": 44, "std_ms": 9.5, "range_ms": 38},
        "lastpoint": 12.5
    }
}"#;

#[test]
pub fn kinds_and_file_names() {
    assert_eq!("secondary".parse::<BaselineKind>().unwrap(), BaselineKind::MasterSecondary);
    assert_eq!(" Enterprise ".parse::<BaselineKind>().unwrap(), BaselineKind::Enterprise);
    assert!("nightly".parse::<BaselineKind>().is_err());
    assert_eq!(BaselineKind::Opensource.file_name(), "opensource_config.json");
    assert_eq!(BaselineKind::MasterSecondary.to_string(), "master_secondary");
}

#[test]
pub fn parse_mixed_entries() {
    let document: BaselineDocument = serde_json::from_str(DOCUMENT).unwrap();
    let entry = &document["100_1_insert_1"];

    assert_eq!(entry.import_speed, Some(1_600_000.0));
    assert_eq!(
        entry.query_baseline("cpu-max-all-1"),
        Some(QueryBaseline {
            mean_ms: Some(48.0),
            med_ms: Some(44.0),
            std_ms: Some(9.5),
            range_ms: Some(38.0),
        })
    );
    assert_eq!(
        entry.query_baseline("lastpoint"),
        Some(QueryBaseline {
            mean_ms: Some(12.5),
            ..QueryBaseline::default()
        })
    );
    assert!(!entry.metrics.contains_key("import_speed"));
}

#[test]
pub fn missing_or_broken_documents_load_empty() {
    let dir = TempDir::new().unwrap();
    let store = BaselineStore::new(dir.path());

    assert!(store.load(BaselineKind::Master).is_empty());

    fs::write(store.path(BaselineKind::Master), "{ not json").unwrap();
    assert!(store.load(BaselineKind::Master).is_empty());
    assert!(store.try_load(BaselineKind::Master).is_err());
}

#[test]
pub fn save_then_load() {
    let dir = TempDir::new().unwrap();
    let store = BaselineStore::new(dir.path().join("config"));
    let document: BaselineDocument = serde_json::from_str(DOCUMENT).unwrap();

    assert!(store.save(BaselineKind::Enterprise, &document));
    assert_eq!(store.load(BaselineKind::Enterprise), document);
    assert_eq!(store.available(), vec![BaselineKind::Enterprise]);
}

#[test]
pub fn merge_overlays_and_backs_up() {
    let dir = TempDir::new().unwrap();
    let store = BaselineStore::new(dir.path());
    let document: BaselineDocument = serde_json::from_str(DOCUMENT).unwrap();
    store.save(BaselineKind::Master, &document);

    let mut update = BaselineEntry::default();
    update
        .metrics
        .insert("lastpoint".to_owned(), MetricBaseline::Legacy(11.0));
    let updates = BaselineDocument::from([
        ("100_1_insert_1".to_owned(), update),
        ("100_3_query_8".to_owned(), BaselineEntry {
            import_speed: Some(1.0),
            ..BaselineEntry::default()
        }),
    ]);

    let summary = store.merge(BaselineKind::Master, updates).unwrap();
    let merged = store.load(BaselineKind::Master);

    assert_eq!(summary.added_configurations, 1);
    assert_eq!(summary.updated_values, 2);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged["100_1_insert_1"].import_speed, Some(1_600_000.0));
    assert_eq!(
        merged["100_1_insert_1"].metrics["lastpoint"],
        MetricBaseline::Legacy(11.0)
    );
    assert!(dir.path().join("master_config.json.backup").is_file());
}

#[test]
pub fn merge_into_nothing() {
    let mut document = BaselineDocument::new();
    let summary = merge_documents(
        &mut document,
        BaselineDocument::from([("k".to_owned(), BaselineEntry::default())]),
    );

    assert_eq!(summary.added_configurations, 1);
    assert_eq!(summary.updated_values, 0);
}
