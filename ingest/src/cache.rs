//! Persistence of the dataset between restarts.
//!
//! The whole dataset is rewritten inside a single SQLite transaction, so a
//! crash mid write leaves the previous snapshot intact.

use crate::{
    record::{RunBatch, RunRecord},
    store::WeakStore,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use itertools::Itertools;
use parking_lot::{Condvar, Mutex};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error")]
    SQLite(#[from] rusqlite::Error),
    #[error("Cache entry is malformed: {0}")]
    Malformed(String),
}

/// A restored snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub saved_at: DateTime<Utc>,
    pub known_runs: BTreeSet<String>,
    pub batches: Vec<RunBatch>,
}

/// Snapshot file of all ingested runs
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
    max_age: chrono::Duration,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>, max_age: chrono::Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, CacheError> {
        let connection = Connection::open(&self.path)?;

        for (counter, table) in SQL_SCHEMA.iter().enumerate() {
            if let Err(error) = connection.execute(table, []) {
                error!(error = ?error, "Failed to apply cache schema ({}/{}): {error}", counter + 1, SQL_SCHEMA.len());

                return Err(CacheError::SQLite(error));
            }
        }

        Ok(connection)
    }

    /// Replace the snapshot with the given runs, returns the number of rows written
    pub fn save(&self, batches: &[RunBatch]) -> Result<usize, CacheError> {
        self.save_at(batches, Utc::now())
    }

    pub fn save_at(&self, batches: &[RunBatch], now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut connection = self.open()?;
        let tx = connection.transaction()?;
        let mut counter = 0;

        tx.execute("delete from records", [])?;
        tx.execute("delete from known_runs", [])?;
        {
            let mut insert_run =
                tx.prepare_cached("insert into known_runs (run_id, timestamp) values (?, ?)")?;
            let mut insert_record = tx.prepare_cached(
                "insert into records
                 (run_id, position, timestamp, branch, scale, cluster, worker, phase,
                  query_type, min_ms, mean_ms, max_ms, med_ms, query_count, import_speed,
                  test_type, wal, replica, dop)
                 values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for batch in batches {
                insert_run.execute(params![
                    batch.run_id,
                    batch.timestamp.format(TIMESTAMP_FORMAT).to_string()
                ])?;

                for (position, record) in batch.records.iter().enumerate() {
                    insert_record.execute(params![
                        record.run_id,
                        position as i64,
                        record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                        record.branch,
                        record.scale,
                        record.cluster,
                        record.worker,
                        record.phase,
                        record.query_type,
                        record.min_ms,
                        record.mean_ms,
                        record.max_ms,
                        record.med_ms,
                        record.query_count,
                        record.import_speed,
                        record.test_type,
                        record.wal,
                        record.replica,
                        record.dop
                    ])?;
                    counter += 1;
                }
            }
        }
        tx.execute(
            "insert or replace into cache_meta (key, value) values ('saved_at', ?)",
            params![now.to_rfc3339()],
        )?;
        tx.commit()?;

        debug!(path = ?self.path, rows = counter, runs = batches.len(), "Saved dataset snapshot");

        Ok(counter)
    }

    /// Load the snapshot, `None` if there is none or it is older than the max age
    pub fn load(&self) -> Result<Option<CacheSnapshot>, CacheError> {
        self.load_at(Utc::now())
    }

    pub fn load_at(&self, now: DateTime<Utc>) -> Result<Option<CacheSnapshot>, CacheError> {
        if !self.path.is_file() {
            debug!(path = ?self.path, "No dataset snapshot found");

            return Ok(None);
        }

        let connection = self.open()?;
        let saved_at: Option<String> = connection
            .query_row(
                "select value from cache_meta where key = 'saved_at'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(saved_at) = saved_at else {
            return Ok(None);
        };
        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .map_err(|error| CacheError::Malformed(format!("saved_at: {error}")))?
            .with_timezone(&Utc);

        if now - saved_at > self.max_age {
            info!(saved_at = %saved_at, "Dataset snapshot is stale, ignoring it");

            return Ok(None);
        }

        let known_runs = connection
            .prepare_cached("select run_id from known_runs")?
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        let records = connection
            .prepare_cached(
                "select run_id, timestamp, branch, scale, cluster, worker, phase, query_type,
                        min_ms, mean_ms, max_ms, med_ms, query_count, import_speed,
                        test_type, wal, replica, dop
                 from records order by run_id, position",
            )?
            .query_map([], read_record)?
            .collect::<Result<Vec<_>, _>>()?;

        let batches = records
            .into_iter()
            .group_by(|record| record.run_id.clone())
            .into_iter()
            .filter_map(|(_, group)| RunBatch::from_records(group.collect()))
            .collect_vec();

        info!(
            saved_at = %saved_at,
            runs = batches.len(),
            "Loaded dataset snapshot"
        );

        Ok(Some(CacheSnapshot {
            saved_at,
            known_runs,
            batches,
        }))
    }
}

fn read_record(row: &Row) -> rusqlite::Result<RunRecord> {
    let timestamp: String = row.get(1)?;
    let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(error)))?;

    Ok(RunRecord {
        run_id: row.get(0)?,
        timestamp,
        branch: row.get(2)?,
        scale: row.get(3)?,
        cluster: row.get(4)?,
        worker: row.get(5)?,
        phase: row.get(6)?,
        query_type: row.get(7)?,
        min_ms: row.get(8)?,
        mean_ms: row.get(9)?,
        max_ms: row.get(10)?,
        med_ms: row.get(11)?,
        query_count: row.get(12)?,
        import_speed: row.get(13)?,
        test_type: row.get(14)?,
        wal: row.get(15)?,
        replica: row.get(16)?,
        dop: row.get(17)?,
    })
}

#[derive(Debug, Default)]
struct SaveState {
    running: bool,
    pending: bool,
}

#[derive(Debug)]
struct WriterShared {
    cache: SnapshotCache,
    store: WeakStore,
    state: Mutex<SaveState>,
    idle: Condvar,
    saved_generation: AtomicU64,
}

/// Background writer that coalesces save requests.
///
/// At most one save runs at a time. Requests arriving while a save is
/// running collapse into a single follow up save.
#[derive(Debug, Clone)]
pub struct CacheWriter(Arc<WriterShared>);

impl CacheWriter {
    pub fn new(cache: SnapshotCache, store: WeakStore) -> Self {
        Self(Arc::new(WriterShared {
            cache,
            store,
            state: Mutex::new(SaveState::default()),
            idle: Condvar::new(),
            saved_generation: AtomicU64::new(0),
        }))
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.0.cache
    }

    /// store generation captured by the last successful save
    pub fn saved_generation(&self) -> u64 {
        self.0.saved_generation.load(Ordering::Acquire)
    }

    /// mark a generation as persisted, e.g. after restoring from this cache
    pub fn mark_saved(&self, generation: u64) {
        self.0.saved_generation.store(generation, Ordering::Release);
    }

    pub fn request_save(&self) {
        {
            let mut state = self.0.state.lock();

            if state.running {
                state.pending = true;
                debug!("Save already running, queued a follow up");

                return;
            }
            state.running = true;
        }

        let shared = Arc::clone(&self.0);
        let spawned = thread::Builder::new()
            .name("snapshot-writer".to_owned())
            .spawn(move || shared.drain());

        if let Err(error) = spawned {
            error!(error = ?error, "Failed to spawn snapshot writer");

            let mut state = self.0.state.lock();
            state.running = false;
            self.0.idle.notify_all();
        }
    }

    /// Block until no save is running or queued, false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.0.state.lock();

        while state.running {
            if self.0.idle.wait_until(&mut state, deadline).timed_out() {
                return !state.running;
            }
        }

        true
    }
}

impl WriterShared {
    fn drain(&self) {
        loop {
            self.save_once();

            let mut state = self.state.lock();
            if state.pending {
                state.pending = false;
                continue;
            }

            state.running = false;
            self.idle.notify_all();
            break;
        }
    }

    fn save_once(&self) {
        let Some(store) = self.store.upgrade() else {
            warn!("Dataset is gone, skipping snapshot");
            return;
        };
        let (generation, batches) = store.snapshot_runs();
        drop(store);

        match self.cache.save(&batches) {
            Ok(rows) => {
                self.saved_generation.store(generation, Ordering::Release);
                info!(rows = rows, generation = generation, "Persisted dataset snapshot");
            }
            Err(error) => error!(error = ?error, "Failed to persist dataset snapshot: {error}"),
        }
    }
}

pub const SQL_SCHEMA: [&str; 3] = [
    "create table if not exists cache_meta (
    key text primary key,
    value text not null
);",
    "create table if not exists known_runs (
    run_id text primary key,
    timestamp text not null
);",
    "create table if not exists records (
    run_id text not null,
    position integer not null,
    timestamp text not null,
    branch text not null,
    scale integer not null,
    cluster integer not null,
    worker integer not null,
    phase text not null,
    query_type text not null,
    min_ms real,
    mean_ms real,
    max_ms real,
    med_ms real,
    query_count real,
    import_speed real,
    test_type text,
    wal text,
    replica integer,
    dop integer not null,
    primary key (run_id, position)
);",
];
