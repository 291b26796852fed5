use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum BaselineError {
    #[error("Unknown baseline kind: {0}")]
    UnknownKind(String),
    #[error("Failed to access baseline file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Baseline document is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("Baseline CSV is invalid: {0}")]
    InvalidCsv(String),
    #[error("Failed to read baseline CSV")]
    Csv(#[from] csv::Error),
}

/// The baseline documents kept side by side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaselineKind {
    Master,
    MasterSecondary,
    Enterprise,
    Opensource,
}

impl BaselineKind {
    pub const ALL: [Self; 4] = [
        Self::Master,
        Self::MasterSecondary,
        Self::Enterprise,
        Self::Opensource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::MasterSecondary => "master_secondary",
            Self::Enterprise => "enterprise",
            Self::Opensource => "opensource",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_config.json", self.as_str())
    }
}

impl fmt::Display for BaselineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaselineKind {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "master_secondary" | "master-secondary" | "secondary" => Ok(Self::MasterSecondary),
            "enterprise" => Ok(Self::Enterprise),
            "opensource" | "open_source" | "open-source" => Ok(Self::Opensource),
            _ => Err(BaselineError::UnknownKind(s.to_owned())),
        }
    }
}

/// Richer per query baseline, any statistic may be absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryBaseline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub med_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_ms: Option<f64>,
}

/// A metric value inside a baseline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricBaseline {
    // a bare mean latency
    Legacy(f64),
    Scoring(QueryBaseline),
    // anything else is kept so saving does not lose it
    Unrecognized(serde_json::Value),
}

impl MetricBaseline {
    pub fn as_query_baseline(&self) -> Option<QueryBaseline> {
        match self {
            Self::Legacy(mean_ms) => Some(QueryBaseline {
                mean_ms: Some(*mean_ms),
                ..QueryBaseline::default()
            }),
            Self::Scoring(baseline) => Some(baseline.clone()),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Baseline values of one configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_speed: Option<f64>,
    // canonical query type -> baseline
    #[serde(flatten)]
    pub metrics: BTreeMap<String, MetricBaseline>,
}

impl BaselineEntry {
    pub fn query_baseline(&self, metric_key: &str) -> Option<QueryBaseline> {
        self.metrics
            .get(metric_key)
            .and_then(MetricBaseline::as_query_baseline)
    }

    /// Overlay `other` onto this entry, returns the number of values written
    pub fn merge(&mut self, other: BaselineEntry) -> usize {
        let mut updated = 0;

        if other.import_speed.is_some() {
            self.import_speed = other.import_speed;
            updated += 1;
        }
        for (metric, value) in other.metrics {
            self.metrics.insert(metric, value);
            updated += 1;
        }

        updated
    }
}

/// config key -> baseline entry
pub type BaselineDocument = BTreeMap<String, BaselineEntry>;

/// Counts of a merge into an existing document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added_configurations: usize,
    pub updated_values: usize,
}

/// Overlay `updates` onto `document` key by key
pub fn merge_documents(document: &mut BaselineDocument, updates: BaselineDocument) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for (key, entry) in updates {
        let existing = document.entry(key).or_insert_with(|| {
            summary.added_configurations += 1;
            BaselineEntry::default()
        });
        summary.updated_values += existing.merge(entry);
    }

    summary
}

/// Baseline documents stored as JSON files in one directory
#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: BaselineKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn try_load(&self, kind: BaselineKind) -> Result<BaselineDocument, BaselineError> {
        let path = self.path(kind);
        let content = fs::read(&path).map_err(|source| BaselineError::Io { path, source })?;

        Ok(serde_json::from_slice(&content)?)
    }

    /// Load a document, absent or unreadable documents are empty
    pub fn load(&self, kind: BaselineKind) -> BaselineDocument {
        match self.try_load(kind) {
            Ok(document) => document,
            Err(BaselineError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!(kind = %kind, "No baseline document");
                BaselineDocument::new()
            }
            Err(error) => {
                error!(kind = %kind, error = ?error, "Failed to load baseline: {error}");
                BaselineDocument::new()
            }
        }
    }

    /// Write a document through a temporary file so readers never see half of it
    pub fn try_save(&self, kind: BaselineKind, document: &BaselineDocument) -> Result<(), BaselineError> {
        let path = self.path(kind);
        let tmp = path.with_extension("json.tmp");
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| BaselineError::Io { path, source }
        };

        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        fs::write(&tmp, serde_json::to_vec_pretty(document)?).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))?;

        info!(kind = %kind, entries = document.len(), "Saved baseline");

        Ok(())
    }

    pub fn save(&self, kind: BaselineKind, document: &BaselineDocument) -> bool {
        match self.try_save(kind, document) {
            Ok(()) => true,
            Err(error) => {
                error!(kind = %kind, error = ?error, "Failed to save baseline: {error}");
                false
            }
        }
    }

    /// Overlay `updates` onto the stored document, keeping a `.backup` copy
    /// of the previous file
    pub fn merge(&self, kind: BaselineKind, updates: BaselineDocument) -> Result<MergeSummary, BaselineError> {
        let path = self.path(kind);
        let mut document = match self.try_load(kind) {
            Ok(document) => document,
            Err(BaselineError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                BaselineDocument::new()
            }
            Err(error) => return Err(error),
        };

        if path.is_file() {
            let backup = backup_path(&path);
            fs::copy(&path, &backup).map_err(|source| BaselineError::Io {
                path: backup.clone(),
                source,
            })?;
            debug!(backup = ?backup, "Backed up baseline");
        }

        let summary = merge_documents(&mut document, updates);
        self.try_save(kind, &document)?;

        Ok(summary)
    }

    /// kinds with a document on disk
    pub fn available(&self) -> Vec<BaselineKind> {
        BaselineKind::ALL
            .into_iter()
            .filter(|kind| self.path(*kind).is_file())
            .collect()
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".backup");

    PathBuf::from(backup)
}
