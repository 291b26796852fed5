use crate::{
    config::LayoutConfig,
    csv_loader::{self, RawTable},
    dirname,
    record::{RunBatch, RunMetadata, RunRecord},
    store::DatasetStore,
};
use globset::{GlobBuilder, GlobMatcher};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// columns a result table has to provide once normalized
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "branch",
    "query_type",
    "scale",
    "worker",
    "min_ms",
    "mean_ms",
    "max_ms",
    "med_ms",
];

static IMPORT_RATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"actually rate ([0-9.]+) rows/sec without ddl time")
        .expect("import rate pattern")
});

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("Directory name is not a run: {0}")]
    UnrecognizedDirectory(String),
    #[error("Result file not found: {0}")]
    MissingResultFile(PathBuf),
    #[error("Failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No CSV strategy could read {0}")]
    UnreadableCsv(PathBuf),
    #[error("Result table is invalid: {0}")]
    Invalid(String),
    #[error("Log glob is invalid")]
    InvalidGlob(#[from] globset::Error),
}

/// Map a raw CSV header onto the canonical column vocabulary
pub fn normalize_column(raw: &str) -> String {
    let lowered = raw
        .trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
        .to_lowercase();
    let collapsed = lowered
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .join("_")
        .replace("_(", "(");

    match collapsed.as_str() {
        "min(ms)" => "min_ms",
        "mean(ms)" | "avg(ms)" | "avg_ms" => "mean_ms",
        "max(ms)" => "max_ms",
        "med(ms)" | "median(ms)" | "median_ms" => "med_ms",
        "query-type" | "querytype" | "query" => "query_type",
        "workers" => "worker",
        "count" | "query-count" | "querycount" => "query_count",
        other => other,
    }
    .to_owned()
}

/// Lenient float parse, anything unparseable or non finite becomes `None`
pub fn tolerant_float(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Lenient integer parse that also accepts integral floats like `"8.0"`
pub fn tolerant_int(cell: &str) -> Option<i64> {
    let cell = cell.trim();

    cell.parse::<i64>().ok().or_else(|| {
        tolerant_float(cell)
            .filter(|value| value.fract() == 0.0 && value.abs() < i64::MAX as f64)
            .map(|value| value as i64)
    })
}

/// first import rate found in the given log text
pub fn scan_import_rate(text: &str) -> Option<f64> {
    IMPORT_RATE
        .captures_iter(text)
        .find_map(|captures| tolerant_float(&captures[1]))
}

/// A result table with normalized, indexed columns
struct ColumnTable {
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl ColumnTable {
    fn new(raw: RawTable) -> Self {
        let mut index = HashMap::new();

        for (position, header) in raw.headers.iter().enumerate() {
            // first occurrence wins for duplicated columns
            index.entry(normalize_column(header)).or_insert(position);
        }

        Self {
            index,
            rows: raw.rows,
        }
    }

    /// required columns neither in the table nor supplied by the directory name
    fn missing_columns(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|column| {
                !matches!(*column, "branch" | "scale" | "worker")
                    && !self.index.contains_key(*column)
            })
            .collect()
    }

    fn cell<'a>(&self, row: &'a [String], column: &str) -> Option<&'a str> {
        self.index
            .get(column)
            .and_then(|position| row.get(*position))
            .map(String::as_str)
    }

    fn float(&self, row: &[String], column: &str) -> Option<f64> {
        self.cell(row, column).and_then(tolerant_float)
    }
}

/// Turns one run directory into rows of the dataset
#[derive(Debug, Clone)]
pub struct RunIngestor {
    result_file: PathBuf,
    log_dir: PathBuf,
    log_glob: GlobMatcher,
}

impl RunIngestor {
    pub fn new(layout: &LayoutConfig) -> Result<Self, IngestorError> {
        Ok(Self {
            result_file: layout.result_file.clone(),
            log_dir: layout.log_dir.clone(),
            log_glob: GlobBuilder::new(&layout.log_glob)
                .build()?
                .compile_matcher(),
        })
    }

    /// result file relative to a run directory
    pub fn result_file(&self) -> &Path {
        &self.result_file
    }

    /// Read, normalize and validate a run without touching any store
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn load_run(&self, run_dir: &Path) -> Result<RunBatch, IngestorError> {
        let run_id = run_id(run_dir);
        let metadata = dirname::parse(&run_id)
            .ok_or_else(|| IngestorError::UnrecognizedDirectory(run_id.clone()))?;

        let csv_path = run_dir.join(&self.result_file);
        if !csv_path.is_file() {
            return Err(IngestorError::MissingResultFile(csv_path));
        }

        let bytes = fs::read(&csv_path).map_err(|source| IngestorError::Read {
            path: csv_path.clone(),
            source,
        })?;
        let (strategy, raw) =
            csv_loader::load(&bytes).ok_or_else(|| IngestorError::UnreadableCsv(csv_path))?;
        debug!(run = %run_id, strategy = strategy, "Read result table");

        let table = ColumnTable::new(raw);
        let missing = table.missing_columns();
        if !missing.is_empty() {
            // missing columns are repaired as nulls, rows then have to stand on their own
            warn!(run = %run_id, missing = ?missing, "Result table lacks columns, filling with nulls");
        }

        let import_speed = self.extract_import_speed(run_dir);
        let records = build_records(&metadata, &table, import_speed)?;

        Ok(RunBatch::new(&metadata, records))
    }

    /// Ingest a run into the store, replacing whatever the store held for it.
    /// Failures are logged and leave no rows of the run behind.
    pub fn ingest(&self, store: &DatasetStore, run_dir: &Path) -> bool {
        match self.load_run(run_dir) {
            Ok(batch) => {
                let run_id = batch.run_id.clone();
                let rows = batch.len();
                let replaced = store.replace_run(batch);

                debug!(run = %run_id, rows = rows, replaced = replaced, "Ingested run");

                true
            }
            Err(error) => {
                let run_id = run_id(run_dir);
                let removed = store.remove_run(&run_id);

                match error {
                    IngestorError::UnrecognizedDirectory(_) | IngestorError::MissingResultFile(_) => {
                        debug!(run = %run_id, "Skipped directory: {error}")
                    }
                    _ => error!(run = %run_id, error = ?error, "Failed to ingest run: {error}"),
                }
                if removed > 0 {
                    warn!(run = %run_id, rows = removed, "Dropped previously ingested rows");
                }

                false
            }
        }
    }

    /// Scan the run's load logs in name order for the reported import rate
    pub fn extract_import_speed(&self, run_dir: &Path) -> Option<f64> {
        let log_dir = run_dir.join(&self.log_dir);
        let entries = fs::read_dir(&log_dir).ok()?;

        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .map_or(false, |name| self.log_glob.is_match(name))
            })
            .sorted()
            .find_map(|path| match fs::read(&path) {
                Ok(bytes) => scan_import_rate(&String::from_utf8_lossy(&bytes)),
                Err(error) => {
                    warn!(path = ?path, error = ?error, "Failed to read load log");
                    None
                }
            })
    }
}

/// directory base name, used as run id
pub fn run_id(run_dir: &Path) -> String {
    run_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn build_records(
    metadata: &RunMetadata,
    table: &ColumnTable,
    import_speed: Option<f64>,
) -> Result<Vec<RunRecord>, IngestorError> {
    if table.rows.is_empty() {
        return Err(IngestorError::Invalid("no rows".to_owned()));
    }

    table
        .rows
        .iter()
        .enumerate()
        .map(|(line, row)| {
            let query_type = table
                .cell(row, "query_type")
                .map(str::trim)
                .filter(|query_type| !query_type.is_empty())
                .ok_or_else(|| IngestorError::Invalid(format!("row {} has no query type", line + 1)))?;
            // runs predating the worker column ran with one worker per degree of parallelism
            let worker = table
                .cell(row, "worker")
                .and_then(tolerant_int)
                .unwrap_or(metadata.dop);

            Ok(RunRecord {
                run_id: metadata.run_id.clone(),
                timestamp: metadata.timestamp,
                branch: metadata.branch.clone(),
                scale: metadata.scale,
                cluster: metadata.cluster,
                worker,
                phase: metadata.phase.clone(),
                query_type: query_type.to_owned(),
                min_ms: table.float(row, "min_ms"),
                mean_ms: table.float(row, "mean_ms"),
                max_ms: table.float(row, "max_ms"),
                med_ms: table.float(row, "med_ms"),
                query_count: table.float(row, "query_count"),
                import_speed,
                test_type: metadata.test_type.clone(),
                wal: metadata.wal.clone(),
                replica: metadata.replica,
                dop: metadata.dop,
            })
        })
        .collect()
}
