//! Live updates: filesystem events under the base directory are mapped to
//! the run directory owning them and replayed into the dataset after a
//! settle delay.

use crate::config::WatchConfig;
use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Base directory does not exist: {0}")]
    MissingBase(PathBuf),
    #[error("Failed to set up filesystem notifications")]
    Notify(#[from] notify::Error),
    #[error("Failed to spawn watcher thread")]
    Spawn(#[source] std::io::Error),
}

/// What a filesystem event means for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchAction {
    pub fn run_dir(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Modified(path) | Self::Removed(path) => path,
        }
    }
}

/// Receiver of watcher decisions
pub trait RunSink: Send + Sync {
    fn ingest_run(&self, run_dir: &Path) -> bool;
    fn remove_run(&self, run_dir: &Path) -> usize;
}

/// Split a path below `base` into the owning run directory and the rest
fn split_run_path(base: &Path, path: &Path) -> Option<(PathBuf, PathBuf)> {
    let relative = path.strip_prefix(base).ok()?;
    let mut components = relative.components();
    let run = components.next()?;

    Some((base.join(run), components.as_path().to_path_buf()))
}

fn is_result_file(base: &Path, result_file: &Path, path: &Path) -> Option<PathBuf> {
    split_run_path(base, path)
        .filter(|(_, rest)| rest == result_file)
        .map(|(run_dir, _)| run_dir)
}

/// the result file itself, or a directory moved in that already holds it
fn creates_run(base: &Path, result_file: &Path, path: &Path) -> Option<PathBuf> {
    split_run_path(base, path)
        .filter(|(run_dir, rest)| {
            rest == result_file
                || (result_file.starts_with(rest) && run_dir.join(result_file).is_file())
        })
        .map(|(run_dir, _)| run_dir)
}

/// removing the run directory or any directory on the way to the result
/// file removes the run
fn removes_run(base: &Path, result_file: &Path, path: &Path) -> Option<PathBuf> {
    split_run_path(base, path)
        .filter(|(_, rest)| result_file.starts_with(rest))
        .map(|(run_dir, _)| run_dir)
}

/// Map a raw notification onto run level actions
pub fn classify(base: &Path, result_file: &Path, event: &Event) -> Vec<WatchAction> {
    let created = |path: &PathBuf| creates_run(base, result_file, path).map(WatchAction::Created);
    let modified =
        |path: &PathBuf| is_result_file(base, result_file, path).map(WatchAction::Modified);
    let removed = |path: &PathBuf| removes_run(base, result_file, path).map(WatchAction::Removed);

    let mut actions: Vec<WatchAction> = match &event.kind {
        EventKind::Create(_) => event.paths.iter().filter_map(created).collect(),
        EventKind::Remove(_) => event.paths.iter().filter_map(removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().filter_map(removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().filter_map(created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut actions = Vec::new();

            if let Some(from) = event.paths.first() {
                actions.extend(removed(from));
            }
            if let Some(to) = event.paths.get(1) {
                actions.extend(created(to));
            }

            actions
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(|path| {
                if path.exists() {
                    created(path)
                } else {
                    removed(path)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event.paths.iter().filter_map(modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    };

    actions.dedup();
    actions
}

/// Runs per run directory work off the event loop, one job per directory
/// at a time. Events for a directory with a job in flight are folded into
/// one rerun after the job finishes.
struct Dispatcher {
    sink: Weak<dyn RunSink>,
    // run dir -> rerun requested
    in_flight: Arc<Mutex<HashMap<PathBuf, bool>>>,
    create_settle: Duration,
    modify_settle: Duration,
}

impl Dispatcher {
    fn dispatch(&self, action: WatchAction) {
        if let WatchAction::Removed(run_dir) = &action {
            if let Some(sink) = self.sink.upgrade() {
                let removed = sink.remove_run(run_dir);
                info!(run = ?run_dir, rows = removed, "Run removed");
            }

            return;
        }

        let run_dir = action.run_dir().to_path_buf();
        {
            let mut in_flight = self.in_flight.lock();

            if let Some(rerun) = in_flight.get_mut(&run_dir) {
                *rerun = true;
                trace!(run = ?run_dir, "Ingest already pending, folded event");

                return;
            }
            in_flight.insert(run_dir.clone(), false);
        }

        let settle = match action {
            WatchAction::Created(_) => self.create_settle,
            _ => self.modify_settle,
        };
        let sink = self.sink.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let modify_settle = self.modify_settle;
        let spawned = thread::Builder::new()
            .name("run-ingest".to_owned())
            .spawn({
                let run_dir = run_dir.clone();
                move || ingest_settled(sink, in_flight, run_dir, settle, modify_settle)
            });

        if let Err(error) = spawned {
            error!(run = ?run_dir, error = ?error, "Failed to spawn ingest job");
            self.in_flight.lock().remove(&run_dir);
        }
    }
}

fn ingest_settled(
    sink: Weak<dyn RunSink>,
    in_flight: Arc<Mutex<HashMap<PathBuf, bool>>>,
    run_dir: PathBuf,
    mut settle: Duration,
    modify_settle: Duration,
) {
    loop {
        thread::sleep(settle);

        match sink.upgrade() {
            Some(sink) => {
                let ingested = sink.ingest_run(&run_dir);
                info!(run = ?run_dir, ingested = ingested, "Run changed on disk");
            }
            None => {
                in_flight.lock().remove(&run_dir);
                return;
            }
        }

        let mut in_flight = in_flight.lock();
        match in_flight.get_mut(&run_dir) {
            Some(rerun) if *rerun => {
                *rerun = false;
                settle = modify_settle;
            }
            _ => {
                in_flight.remove(&run_dir);
                return;
            }
        }
    }
}

/// Handle of a running watcher, stops and joins its thread on drop
#[derive(Debug)]
pub struct ChangeWatcher {
    stop: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    pub fn start(
        base: &Path,
        result_file: &Path,
        config: &WatchConfig,
        sink: Weak<dyn RunSink>,
    ) -> Result<Self, WatchError> {
        if !base.is_dir() {
            return Err(WatchError::MissingBase(base.to_path_buf()));
        }
        // notifications carry paths below the watched path as given
        let base = base
            .canonicalize()
            .map_err(|_| WatchError::MissingBase(base.to_path_buf()))?;

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        watcher.watch(&base, RecursiveMode::Recursive)?;

        let stop = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher {
            sink,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            create_settle: config.create_settle(),
            modify_settle: config.modify_settle(),
        };
        let result_file = result_file.to_path_buf();
        let thread_stop = Arc::clone(&stop);

        info!(path = ?base, "Watching for run changes");

        let thread_handle = thread::Builder::new()
            .name("run-watcher".to_owned())
            .spawn(move || {
                event_loop(&base, &result_file, &dispatcher, &rx, &thread_stop);
                // dropping the watcher ends the watch
                drop(watcher);
                debug!(path = ?base, "Watcher stopped");
            })
            .map_err(WatchError::Spawn)?;

        Ok(Self {
            stop,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Watcher thread panicked");
            }
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(
    base: &Path,
    result_file: &Path,
    dispatcher: &Dispatcher,
    rx: &mpsc::Receiver<notify::Result<Event>>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                for action in classify(base, result_file, &event) {
                    debug!(action = ?action, "Run change detected");
                    dispatcher.dispatch(action);
                }
            }
            Ok(Err(error)) => warn!(error = ?error, "Filesystem notification error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Filesystem notifications ended");
                break;
            }
        }
    }
}
