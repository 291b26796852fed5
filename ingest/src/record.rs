use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// phase assigned when only the fallback directory pattern matched
pub const UNKNOWN_PHASE: &str = "unknown";

/// Metadata recovered from a run directory name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// the directory's base name, unique per run
    pub run_id: String,
    pub timestamp: NaiveDateTime,
    pub branch: String,
    pub scale: i64,
    pub cluster: i64,
    pub phase: String,
    pub test_type: Option<String>,
    pub wal: Option<String>,
    pub replica: Option<i64>,
    pub dop: i64,
}

/// One query-type measurement of a run, with the run's metadata replicated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub timestamp: NaiveDateTime,
    pub branch: String,
    pub scale: i64,
    pub cluster: i64,
    pub worker: i64,
    pub phase: String,
    pub query_type: String,
    pub min_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub med_ms: Option<f64>,
    pub query_count: Option<f64>,
    pub import_speed: Option<f64>,
    pub test_type: Option<String>,
    pub wal: Option<String>,
    pub replica: Option<i64>,
    pub dop: i64,
}

impl RunRecord {
    pub fn config_key(&self) -> String {
        config_key(self.scale, self.cluster, &self.phase, self.worker)
    }
}

/// Join key between run records and baseline entries
pub fn config_key(scale: i64, cluster: i64, phase: &str, worker: i64) -> String {
    format!("{scale}_{cluster}_{phase}_{worker}")
}

/// A flat snapshot of records
pub type Table = Vec<RunRecord>;

/// All rows of a single run, stored and replaced as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct RunBatch {
    pub run_id: String,
    pub timestamp: NaiveDateTime,
    pub records: Vec<RunRecord>,
}

impl RunBatch {
    pub fn new(metadata: &RunMetadata, records: Vec<RunRecord>) -> Self {
        Self {
            run_id: metadata.run_id.clone(),
            timestamp: metadata.timestamp,
            records,
        }
    }

    /// rebuild a batch from records that all share one run id
    pub fn from_records(records: Vec<RunRecord>) -> Option<Self> {
        let first = records.first()?;

        Some(Self {
            run_id: first.run_id.clone(),
            timestamp: first.timestamp,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
