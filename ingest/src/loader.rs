use crate::{
    cache::{CacheWriter, SnapshotCache},
    collector::RunCollector,
    config::LoaderConfig,
    ingest::{run_id, IngestorError, RunIngestor},
    store::DatasetStore,
    watcher::{ChangeWatcher, RunSink},
};
use chrono::{Local, NaiveDateTime};
use itertools::Itertools;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::{
    collections::BTreeSet,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Receiver},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const PROGRESS_INTERVAL: usize = 50;
const MAINTENANCE_TICK: Duration = Duration::from_secs(1);
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);
const SHUTDOWN_SAVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Run ingestor failed to load")]
    Ingestor(#[from] IngestorError),
}

/// Outcome of a bulk load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    // run directories found below the base directory
    pub scanned: usize,
    // runs taken over from the snapshot
    pub restored: usize,
    pub ingested: usize,
    pub failed: usize,
    // snapshot runs whose directory is gone
    pub dropped: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
struct LoaderShared {
    config: LoaderConfig,
    store: DatasetStore,
    ingestor: RunIngestor,
    writer: Option<CacheWriter>,
    loaded: AtomicBool,
    stop: AtomicBool,
}

/// Owns the dataset and everything keeping it current: bulk loading,
/// live updates, snapshot persistence and retention
#[derive(Debug)]
pub struct ReportLoader {
    shared: Arc<LoaderShared>,
    watcher: Mutex<Option<ChangeWatcher>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Completion handle of a background bulk load
#[derive(Debug)]
pub struct LoadHandle {
    rx: Receiver<LoadSummary>,
    summary: Option<LoadSummary>,
}

impl LoadHandle {
    /// Wait up to `timeout` for the load to finish
    pub fn wait(&mut self, timeout: Duration) -> Option<LoadSummary> {
        if self.summary.is_none() {
            self.summary = self.rx.recv_timeout(timeout).ok();
        }

        self.summary.clone()
    }
}

impl ReportLoader {
    pub fn new(config: LoaderConfig) -> Result<Self, LoaderError> {
        let store = DatasetStore::new();
        let ingestor = RunIngestor::new(&config.layout)?;
        let writer = config.cache.enabled.then(|| {
            CacheWriter::new(
                SnapshotCache::new(&config.cache.path, config.cache.max_age()),
                store.downgrade(),
            )
        });

        Ok(Self {
            shared: Arc::new(LoaderShared {
                config,
                store,
                ingestor,
                writer,
                loaded: AtomicBool::new(false),
                stop: AtomicBool::new(false),
            }),
            watcher: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &DatasetStore {
        &self.shared.store
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    pub fn ingestor(&self) -> &RunIngestor {
        &self.shared.ingestor
    }

    /// true once the initial bulk load finished
    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    /// Load every run below the base directory, blocking until done
    pub fn bulk_load(&self) -> LoadSummary {
        self.shared.bulk_load()
    }

    /// Run the bulk load on its own thread; queries see runs as they commit
    pub fn start_background_load(&self) -> LoadHandle {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("bulk-load".to_owned())
            .spawn(move || {
                let summary = shared.bulk_load();
                // nobody waiting is fine
                let _ = tx.send(summary);
            });

        if let Err(error) = spawned {
            error!(error = ?error, "Failed to spawn bulk load");
        }

        LoadHandle { rx, summary: None }
    }

    /// (Re)ingest a single run directory
    pub fn reload_run(&self, run_dir: &Path) -> bool {
        self.shared.ingest_run(run_dir)
    }

    /// Start live updates, a failure only disables them
    pub fn start_watcher(&self) -> bool {
        let config = &self.shared.config;

        if !config.watch.enabled {
            info!("Live updates are disabled");
            return false;
        }

        let sink: Weak<dyn RunSink> = Arc::downgrade(&self.shared) as Weak<LoaderShared>;
        match ChangeWatcher::start(
            &config.layout.path,
            self.shared.ingestor.result_file(),
            &config.watch,
            sink,
        ) {
            Ok(watcher) => {
                *self.watcher.lock() = Some(watcher);
                true
            }
            Err(error) => {
                warn!(error = ?error, "Live updates unavailable: {error}");
                false
            }
        }
    }

    /// Start periodic snapshot saving and the retention sweep
    pub fn start_maintenance(&self) {
        let shared = Arc::downgrade(&self.shared);
        let spawned = thread::Builder::new()
            .name("maintenance".to_owned())
            .spawn(move || maintenance_loop(shared));

        match spawned {
            Ok(handle) => self.threads.lock().push(handle),
            Err(error) => error!(error = ?error, "Failed to spawn maintenance thread"),
        }
    }

    /// Drop runs older than the retention window, returns the number removed
    pub fn sweep_retention(&self, now: NaiveDateTime) -> usize {
        self.shared.sweep_retention(now)
    }

    /// Queue a snapshot if the dataset changed since the last one
    pub fn save_if_changed(&self) -> bool {
        self.shared.save_if_changed()
    }

    /// Stop background work and write a final snapshot
    pub fn shutdown(&self) {
        self.stop_background();

        if let Some(writer) = &self.shared.writer {
            self.shared.save_if_changed();

            if !writer.wait_idle(SHUTDOWN_SAVE_TIMEOUT) {
                warn!("Final snapshot did not finish in time");
            }
        }
    }

    fn stop_background(&self) {
        self.shared.stop.store(true, Ordering::Release);

        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                error!("Maintenance thread panicked");
            }
        }
    }
}

impl Drop for ReportLoader {
    fn drop(&mut self) {
        self.stop_background();
    }
}

impl LoaderShared {
    fn bulk_load(&self) -> LoadSummary {
        let started = Instant::now();
        let mut summary = LoadSummary::default();
        let mut known = BTreeSet::new();

        if let Some(writer) = &self.writer {
            match writer.cache().load() {
                Ok(Some(snapshot)) => {
                    // live updates may already have committed runs, those are kept
                    let untouched = self.store.generation() == 0;
                    known = snapshot.known_runs;
                    summary.restored = self.store.restore(snapshot.batches);

                    if untouched {
                        writer.mark_saved(self.store.generation());
                    }
                }
                Ok(None) => debug!("Starting without snapshot"),
                Err(error) => warn!(error = ?error, "Failed to read snapshot, loading from scratch: {error}"),
            }
        }

        let run_dirs = RunCollector::load(&self.config.layout.path).collect_vec();
        let on_disk = run_dirs.iter().map(|dir| run_id(dir)).collect::<BTreeSet<_>>();
        summary.scanned = run_dirs.len();

        for vanished in known.difference(&on_disk) {
            if self.store.remove_run(vanished) > 0 {
                summary.dropped += 1;
            }
        }

        let pending = run_dirs
            .into_iter()
            .filter(|dir| !known.contains(&run_id(dir)))
            .collect_vec();
        let total = pending.len();
        let progress = AtomicUsize::new(0);

        info!(
            scanned = summary.scanned,
            pending = total,
            restored = summary.restored,
            "Loading runs"
        );

        summary.ingested = pending
            .par_iter()
            .filter(|dir| {
                let ingested = self.ingestor.ingest(&self.store, dir);
                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;

                if done % PROGRESS_INTERVAL == 0 {
                    info!("Loaded {done}/{total} runs");
                }

                ingested
            })
            .count();
        summary.failed = total - summary.ingested;

        if summary.ingested > 0 || summary.dropped > 0 {
            self.request_save();
        }

        summary.elapsed = started.elapsed();
        self.loaded.store(true, Ordering::Release);

        info!(
            runs = self.store.run_count(),
            rows = self.store.len(),
            ingested = summary.ingested,
            failed = summary.failed,
            dropped = summary.dropped,
            elapsed = ?summary.elapsed,
            "Finished loading runs"
        );

        summary
    }

    fn request_save(&self) {
        if let Some(writer) = &self.writer {
            writer.request_save();
        }
    }

    fn save_if_changed(&self) -> bool {
        match &self.writer {
            Some(writer) if writer.saved_generation() != self.store.generation() => {
                writer.request_save();
                true
            }
            _ => false,
        }
    }

    fn sweep_retention(&self, now: NaiveDateTime) -> usize {
        let Some(days) = self.config.retention_days else {
            return 0;
        };
        let cutoff = now - chrono::Duration::days(i64::from(days));
        let removed = self.store.retain_since(cutoff);

        if !removed.is_empty() {
            info!(cutoff = %cutoff, runs = removed.len(), "Removed runs past retention");
            self.request_save();
        }

        removed.len()
    }
}

impl RunSink for LoaderShared {
    fn ingest_run(&self, run_dir: &Path) -> bool {
        let ingested = self.ingestor.ingest(&self.store, run_dir);
        self.request_save();

        ingested
    }

    fn remove_run(&self, run_dir: &Path) -> usize {
        let removed = self.store.remove_run(&run_id(run_dir));

        if removed > 0 {
            self.request_save();
        }

        removed
    }
}

fn maintenance_loop(shared: Weak<LoaderShared>) {
    let mut last_save = Instant::now();
    let mut last_sweep = Instant::now();

    loop {
        thread::sleep(MAINTENANCE_TICK);

        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        if last_save.elapsed() >= shared.config.cache.save_interval() {
            shared.save_if_changed();
            last_save = Instant::now();
        }
        if last_sweep.elapsed() >= RETENTION_INTERVAL {
            shared.sweep_retention(Local::now().naive_local());
            last_sweep = Instant::now();
        }
    }

    debug!("Maintenance stopped");
}
