use crate::record::{RunBatch, RunRecord, Table};
use chrono::NaiveDateTime;
use parking_lot::{lock_api::ArcMutexGuard, FairMutex, Mutex, RawFairMutex};
use serde::Serialize;
use std::{
    borrow::Borrow,
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Debug, Clone, Default)]
/// Transparent, thread safe wrapper over `InnerStore`.
///
/// Every operation takes the lock exactly once, so readers observe either
/// all rows of a run or none of them. Operations never call each other
/// while holding the lock.
pub struct DatasetStore(Arc<FairMutex<InnerStore>>);

/// Non owning handle, used by background threads that must not keep the
/// store alive
#[derive(Debug, Clone)]
pub struct WeakStore(Weak<FairMutex<InnerStore>>);

#[derive(Debug, Default)]
pub struct InnerStore {
    runs: BTreeMap<String, RunBatch>,
    rows: usize,
    generation: u64,
}

/// Row predicate; `None` on a dimension means no constraint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub branches: Option<BTreeSet<String>>,
    pub query_types: Option<BTreeSet<String>>,
    pub scales: Option<BTreeSet<i64>>,
    pub clusters: Option<BTreeSet<i64>>,
    pub workers: Option<BTreeSet<i64>>,
    pub phases: Option<BTreeSet<String>>,
    pub start: Option<NaiveDateTime>,
    // exclusive
    pub end: Option<NaiveDateTime>,
}

/// Sorted distinct values offered to clients for filtering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub branches: Vec<String>,
    pub query_types: Vec<String>,
    pub scales: Vec<i64>,
    pub clusters: Vec<i64>,
    pub workers: Vec<i64>,
    pub execution_types: Vec<String>,
}

fn allows<Q: Ord + ?Sized, T: Ord + Borrow<Q>>(set: &Option<BTreeSet<T>>, value: &Q) -> bool {
    set.as_ref().map_or(true, |set| set.contains(value))
}

impl RowFilter {
    /// check the constraints shared by every row of a run
    pub fn matches_run(&self, batch: &RunBatch) -> bool {
        self.start.map_or(true, |start| batch.timestamp >= start)
            && self.end.map_or(true, |end| batch.timestamp < end)
    }

    pub fn matches(&self, record: &RunRecord) -> bool {
        allows(&self.branches, record.branch.as_str())
            && allows(&self.query_types, record.query_type.as_str())
            && allows(&self.phases, record.phase.as_str())
            && allows(&self.scales, &record.scale)
            && allows(&self.clusters, &record.cluster)
            && allows(&self.workers, &record.worker)
            && self.start.map_or(true, |start| record.timestamp >= start)
            && self.end.map_or(true, |end| record.timestamp < end)
    }
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<DatasetStore> {
        self.0.upgrade().map(DatasetStore)
    }
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ArcMutexGuard<RawFairMutex, InnerStore> {
        self.0.lock_arc()
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.0))
    }

    /// full snapshot of all rows, ordered by run id
    pub fn get_data(&self) -> Table {
        self.lock().rows_matching(&RowFilter::default())
    }

    pub fn get_data_filtered(&self, filter: &RowFilter) -> Table {
        self.lock().rows_matching(filter)
    }

    pub fn get_options(&self) -> FilterOptions {
        self.lock().options()
    }

    /// options together with the generation they were computed at
    pub fn options_with_generation(&self) -> (u64, FilterOptions) {
        let inner = self.lock();

        (inner.generation, inner.options())
    }

    /// Swap in all rows of a run, returns the number of rows it replaced
    pub fn replace_run(&self, batch: RunBatch) -> usize {
        self.lock().replace_run(batch)
    }

    /// Drop all rows of a run, returns the number of rows removed
    pub fn remove_run(&self, run_id: &str) -> usize {
        self.lock().remove_run(run_id)
    }

    pub fn contains_run(&self, run_id: &str) -> bool {
        self.lock().runs.contains_key(run_id)
    }

    pub fn known_runs(&self) -> BTreeSet<String> {
        self.lock().runs.keys().cloned().collect()
    }

    /// number of rows
    pub fn len(&self) -> usize {
        self.lock().rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn run_count(&self) -> usize {
        self.lock().runs.len()
    }

    /// counter bumped by every mutation
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// replace the whole content, e.g. from a persisted snapshot
    /// Add snapshot runs the store does not hold yet, returns how many were added.
    /// Runs ingested in the meantime are newer and stay.
    pub fn restore(&self, batches: Vec<RunBatch>) -> usize {
        self.lock().restore(batches)
    }

    pub fn snapshot_runs(&self) -> (u64, Vec<RunBatch>) {
        let inner = self.lock();

        (inner.generation, inner.runs.values().cloned().collect())
    }

    /// Drop every run older than `cutoff`, returns the removed run ids
    pub fn retain_since(&self, cutoff: NaiveDateTime) -> Vec<String> {
        self.lock().retain_since(cutoff)
    }
}

impl InnerStore {
    fn rows_matching(&self, filter: &RowFilter) -> Table {
        self.runs
            .values()
            .filter(|batch| filter.matches_run(batch))
            .flat_map(|batch| batch.records.iter())
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    fn options(&self) -> FilterOptions {
        let mut branches = BTreeSet::new();
        let mut query_types = BTreeSet::new();
        let mut scales = BTreeSet::new();
        let mut clusters = BTreeSet::new();
        let mut workers = BTreeSet::new();
        let mut execution_types = BTreeSet::new();

        for record in self.runs.values().flat_map(|batch| batch.records.iter()) {
            branches.insert(record.branch.as_str());
            query_types.insert(record.query_type.as_str());
            scales.insert(record.scale);
            clusters.insert(record.cluster);
            workers.insert(record.worker);
            execution_types.insert(record.phase.as_str());
        }

        FilterOptions {
            branches: branches.into_iter().map(str::to_owned).collect(),
            query_types: query_types.into_iter().map(str::to_owned).collect(),
            scales: scales.into_iter().collect(),
            clusters: clusters.into_iter().collect(),
            workers: workers.into_iter().collect(),
            execution_types: execution_types.into_iter().map(str::to_owned).collect(),
        }
    }

    fn replace_run(&mut self, batch: RunBatch) -> usize {
        let added = batch.len();
        let replaced = self
            .runs
            .insert(batch.run_id.clone(), batch)
            .map_or(0, |old| old.len());

        self.rows = self.rows + added - replaced;
        self.generation += 1;

        replaced
    }

    fn remove_run(&mut self, run_id: &str) -> usize {
        match self.runs.remove(run_id) {
            Some(batch) => {
                self.rows -= batch.len();
                self.generation += 1;

                batch.len()
            }
            None => 0,
        }
    }

    fn restore(&mut self, batches: Vec<RunBatch>) -> usize {
        let mut restored = 0;

        for batch in batches {
            if let Entry::Vacant(slot) = self.runs.entry(batch.run_id.clone()) {
                self.rows += batch.len();
                slot.insert(batch);
                restored += 1;
            }
        }
        if restored > 0 {
            self.generation += 1;
        }

        restored
    }

    fn retain_since(&mut self, cutoff: NaiveDateTime) -> Vec<String> {
        let expired = self
            .runs
            .values()
            .filter(|batch| batch.timestamp < cutoff)
            .map(|batch| batch.run_id.clone())
            .collect::<Vec<_>>();

        for run_id in expired.iter() {
            self.remove_run(run_id);
        }

        expired
    }
}

#[derive(Debug)]
struct CachedOptions {
    generation: u64,
    computed_at: Instant,
    options: FilterOptions,
}

/// Memoized filter options, recomputed when the store changed or the
/// time to live ran out
#[derive(Debug)]
pub struct OptionsCache {
    ttl: Duration,
    slot: Mutex<Option<CachedOptions>>,
}

impl OptionsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self, store: &DatasetStore) -> FilterOptions {
        let generation = store.generation();

        if let Some(cached) = self.slot.lock().as_ref() {
            if cached.generation == generation && cached.computed_at.elapsed() < self.ttl {
                return cached.options.clone();
            }
        }

        let (generation, options) = store.options_with_generation();
        debug!(generation = generation, "Recomputed filter options");

        *self.slot.lock() = Some(CachedOptions {
            generation,
            computed_at: Instant::now(),
            options: options.clone(),
        });

        options
    }

    pub fn invalidate(&self) {
        self.slot.lock().take();
    }
}
