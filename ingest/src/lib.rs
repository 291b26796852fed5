//! Loading side of the TSBS report: turns benchmark run directories into an
//! in-memory table and keeps that table current while runs come and go.

pub mod cache;
pub mod collector;
pub mod config;
pub mod csv_loader;
pub mod dirname;
pub mod ingest;
pub mod loader;
pub mod record;
pub mod store;
pub mod watcher;

pub use config::{CacheConfig, LayoutConfig, LoaderConfig, WatchConfig};
pub use ingest::{IngestorError, RunIngestor};
pub use loader::{LoadHandle, LoadSummary, LoaderError, ReportLoader};
pub use record::{config_key, RunBatch, RunMetadata, RunRecord, Table, UNKNOWN_PHASE};
pub use store::{DatasetStore, FilterOptions, OptionsCache, RowFilter, WeakStore};

#[cfg(test)]
mod cache_test;
#[cfg(test)]
mod csv_loader_test;
#[cfg(test)]
mod dirname_test;
