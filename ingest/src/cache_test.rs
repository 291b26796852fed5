use crate::{
    cache::{CacheWriter, SnapshotCache},
    record::{RunBatch, RunRecord},
    store::DatasetStore,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::time;
use tempfile::TempDir;

fn batch(run_id: &str) -> RunBatch {
    let timestamp = NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(14, 30, 22)
        .unwrap();
    let record = |query_type: &str, mean_ms: Option<f64>| RunRecord {
        run_id: run_id.to_owned(),
        timestamp,
        branch: "main".to_owned(),
        scale: 100,
        cluster: 3,
        worker: 8,
        phase: "query".to_owned(),
        query_type: query_type.to_owned(),
        min_ms: Some(0.5),
        mean_ms,
        max_ms: None,
        med_ms: Some(1.25),
        query_count: Some(1000.0),
        import_speed: Some(1_500_000.0),
        test_type: Some("tsbs".to_owned()),
        wal: Some("wal1".to_owned()),
        replica: Some(2),
        dop: 8,
    };

    RunBatch::from_records(vec![record("z-last", Some(2.5)), record("a-first", None)]).unwrap()
}

#[test]
pub fn snapshot_round_trip_keeps_row_order() {
    let dir = TempDir::new().unwrap();
    let cache = SnapshotCache::new(dir.path().join("cache.sqlite3"), Duration::hours(24));
    let saved_at = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap();
    let batches = vec![batch("run-a"), batch("run-b")];

    assert_eq!(cache.save_at(&batches, saved_at).unwrap(), 4);

    let snapshot = cache.load_at(saved_at + Duration::hours(1)).unwrap().unwrap();
    assert_eq!(snapshot.saved_at, saved_at);
    assert_eq!(snapshot.batches, batches);
    assert!(snapshot.known_runs.contains("run-b"));
}

#[test]
pub fn stale_or_missing_snapshots_are_ignored() {
    let dir = TempDir::new().unwrap();
    let cache = SnapshotCache::new(dir.path().join("cache.sqlite3"), Duration::hours(24));
    let saved_at = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap();

    assert_eq!(cache.load_at(saved_at).unwrap(), None);

    cache.save_at(&[batch("run-a")], saved_at).unwrap();
    assert_eq!(cache.load_at(saved_at + Duration::hours(25)).unwrap(), None);
}

#[test]
pub fn saving_again_replaces_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let cache = SnapshotCache::new(dir.path().join("cache.sqlite3"), Duration::hours(24));

    cache.save(&[batch("run-a"), batch("run-b")]).unwrap();
    cache.save(&[batch("run-b")]).unwrap();

    let snapshot = cache.load().unwrap().unwrap();
    assert_eq!(snapshot.batches, vec![batch("run-b")]);
    assert_eq!(snapshot.known_runs.len(), 1);
}

#[test]
pub fn writer_persists_current_generation() {
    let dir = TempDir::new().unwrap();
    let cache = SnapshotCache::new(dir.path().join("cache.sqlite3"), Duration::hours(24));
    let store = DatasetStore::new();
    let writer = CacheWriter::new(cache.clone(), store.downgrade());

    store.replace_run(batch("run-a"));
    for _ in 0..5 {
        writer.request_save();
    }
    store.replace_run(batch("run-b"));
    writer.request_save();

    assert!(writer.wait_idle(time::Duration::from_secs(10)));
    assert_eq!(writer.saved_generation(), store.generation());
    assert_eq!(cache.load().unwrap().unwrap().batches.len(), 2);
}
