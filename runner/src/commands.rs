use crate::config::ReportConfig;
use chrono::NaiveDate;
use clap::Args;
use itertools::Itertools;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info, warn};
use tsbs_report_analysis::{
    convert::parse_baseline_csv,
    derive::{derive, select_window},
    BaselineDocument, BaselineError, BaselineFormat, BaselineKind, BaselineStore, DeriveError,
    Derivation,
};
use tsbs_report_ingest::{DatasetStore, LoaderError, ReportLoader, RunRecord};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Loader failed to start")]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Baseline(#[from] BaselineError),
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error("Failed to serialize output")]
    Json(#[from] serde_json::Error),
    #[error("Start date {start} is after end date {end}")]
    InvertedWindow { start: NaiveDate, end: NaiveDate },
    #[error("No data for branch '{branch}' between {start} and {end}, see list-available")]
    EmptyWindow {
        branch: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("Failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to start the async runtime")]
    Runtime(#[source] io::Error),
    #[error("HTTP server failed")]
    Server(#[source] io::Error),
}

#[derive(Args, Debug, Clone)]
pub struct DeriveArgs {
    /// first day of the window, YYYY-MM-DD
    #[arg(short, long)]
    pub start: NaiveDate,
    /// last day of the window (inclusive), YYYY-MM-DD
    #[arg(short, long)]
    pub end: NaiveDate,
    #[arg(short, long, default_value = "master")]
    pub branch: String,
    /// baseline document to update
    #[arg(short, long, default_value_t = BaselineKind::Master)]
    pub kind: BaselineKind,
    /// legacy (mean latency per query) or scoring (mean, median, std, range)
    #[arg(short, long, default_value_t = BaselineFormat::Legacy)]
    pub format: BaselineFormat,
    /// write the document here instead of the baseline directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// overlay onto the existing document instead of replacing it
    #[arg(long)]
    pub merge: bool,
    /// print the result without writing anything
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub skip_validation: bool,
    /// write every trimmed mean with its inputs as JSON
    #[arg(long)]
    pub export_calc_log: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// baseline CSV, tabular or transposed
    pub csv: PathBuf,
    #[arg(short, long, default_value_t = BaselineKind::Master)]
    pub kind: BaselineKind,
    #[arg(long)]
    pub merge: bool,
    #[arg(long)]
    pub dry_run: bool,
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), CommandError> {
    let text = serde_json::to_string_pretty(value)?;

    fs::write(path, text).map_err(|source| CommandError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Bulk load the configured runs without live updates
pub fn load_dataset(config: &ReportConfig) -> Result<DatasetStore, CommandError> {
    let mut loader_config = config.loader_config();
    loader_config.watch.enabled = false;

    let loader = ReportLoader::new(loader_config)?;
    let summary = loader.bulk_load();
    info!(
        runs = summary.ingested + summary.restored,
        failed = summary.failed,
        "Loaded dataset"
    );
    // persists the snapshot for the next invocation
    loader.shutdown();

    Ok(loader.store().clone())
}

/// Derive a baseline from a window of runs and store it as requested
pub fn derive_baseline(
    rows: &[RunRecord],
    args: &DeriveArgs,
    baselines: &BaselineStore,
) -> Result<Derivation, CommandError> {
    if args.start > args.end {
        return Err(CommandError::InvertedWindow {
            start: args.start,
            end: args.end,
        });
    }

    let window = select_window(rows, args.start, args.end, &args.branch);
    if window.is_empty() {
        return Err(CommandError::EmptyWindow {
            branch: args.branch.clone(),
            start: args.start,
            end: args.end,
        });
    }

    for (date, count) in window
        .iter()
        .counts_by(|record| record.timestamp.date())
        .into_iter()
        .sorted()
    {
        info!("{date}: {count} records");
    }
    if args.skip_validation {
        warn!("Completeness validation skipped, the baseline may lack configurations");
    }

    let derivation = derive(&window, args.format, !args.skip_validation).map_err(|e| {
        if let DeriveError::Incomplete(problems) = &e {
            for (number, problem) in problems.iter().enumerate() {
                error!("{}. {problem}", number + 1);
            }
            error!("Use --skip-validation to bypass this check");
        }
        e
    })?;

    if let Some(path) = &args.export_calc_log {
        write_json(path, &derivation.calculation_log)?;
        info!("Calculation log written to {}", path.to_string_lossy());
    }

    if !args.dry_run {
        store_document(
            baselines,
            args.kind,
            derivation.baselines.clone(),
            args.merge,
            args.output.as_deref(),
        )?;
    }

    Ok(derivation)
}

/// Convert a baseline CSV and store it as requested
pub fn import_baseline(args: &ImportArgs, baselines: &BaselineStore) -> Result<BaselineDocument, CommandError> {
    let text = fs::read(&args.csv).map_err(|source| CommandError::Io {
        path: args.csv.clone(),
        source,
    })?;
    let document = parse_baseline_csv(&String::from_utf8_lossy(&text))?;
    info!(configurations = document.len(), "Converted baseline CSV");

    if !args.dry_run {
        store_document(baselines, args.kind, document.clone(), args.merge, None)?;
    }

    Ok(document)
}

fn store_document(
    baselines: &BaselineStore,
    kind: BaselineKind,
    document: BaselineDocument,
    merge: bool,
    output: Option<&Path>,
) -> Result<(), CommandError> {
    match output {
        Some(path) => {
            write_json(path, &document)?;
            info!("Baseline written to {}", path.to_string_lossy());
        }
        None if merge => {
            let summary = baselines.merge(kind, document)?;
            info!(
                kind = %kind,
                added = summary.added_configurations,
                updated = summary.updated_values,
                "Merged baseline"
            );
        }
        None => {
            baselines.try_save(kind, &document)?;
            info!(kind = %kind, configurations = document.len(), "Saved baseline");
        }
    }

    Ok(())
}

/// Records per (date, branch) in the dataset
pub fn available_data(rows: &[RunRecord]) -> Vec<(NaiveDate, String, usize)> {
    rows.iter()
        .counts_by(|record| (record.timestamp.date(), record.branch.clone()))
        .into_iter()
        .map(|((date, branch), count)| (date, branch, count))
        .sorted()
        .collect_vec()
}
