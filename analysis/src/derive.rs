use crate::{
    baseline::{BaselineDocument, BaselineEntry, MetricBaseline, QueryBaseline},
    canonical::metric_key,
};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use tsbs_report_ingest::{config_key, RunRecord};

#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("No rows to derive a baseline from")]
    NoData,
    #[error("{} completeness problem(s) found", .0.len())]
    Incomplete(Vec<String>),
    #[error("Unknown baseline format: {0}")]
    UnknownFormat(String),
}

/// Shape of the derived metric values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BaselineFormat {
    // one trimmed mean latency per query type
    #[default]
    Legacy,
    // trimmed mean and median, std deviation and range per query type
    Scoring,
}

impl FromStr for BaselineFormat {
    type Err = DeriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "scoring" => Ok(Self::Scoring),
            _ => Err(DeriveError::UnknownFormat(s.to_owned())),
        }
    }
}

impl fmt::Display for BaselineFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Legacy => "legacy",
            Self::Scoring => "scoring",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimMethod {
    SimpleMean,
    TrimmedMean,
}

/// A trimmed mean together with how it was computed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrimmedMean {
    pub method: TrimMethod,
    pub original_values: Vec<f64>,
    pub removed_values: Vec<f64>,
    pub used_values: Vec<f64>,
    pub result: f64,
}

/// Mean after dropping one minimum and one maximum; plain mean for two or
/// fewer values, `None` for none
pub fn trimmed_mean(values: &[f64]) -> Option<TrimmedMean> {
    if values.is_empty() {
        return None;
    }
    if values.len() <= 2 {
        return Some(TrimmedMean {
            method: TrimMethod::SimpleMean,
            original_values: values.to_vec(),
            removed_values: Vec::new(),
            used_values: values.to_vec(),
            result: mean(values),
        });
    }

    let sorted = values
        .iter()
        .copied()
        .sorted_by(|a, b| a.total_cmp(b))
        .collect_vec();
    let used = sorted[1..sorted.len() - 1].to_vec();

    Some(TrimmedMean {
        method: TrimMethod::TrimmedMean,
        original_values: values.to_vec(),
        removed_values: vec![sorted[0], sorted[sorted.len() - 1]],
        result: mean(&used),
        used_values: used,
    })
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, zero for fewer than two values
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let squares = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();

    (squares / (values.len() - 1) as f64).sqrt()
}

/// Middle value, average of the two middle values for even lengths
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sorted = values
        .iter()
        .copied()
        .sorted_by(|a, b| a.total_cmp(b))
        .collect_vec();
    let middle = sorted.len() / 2;

    Some(if sorted.len() % 2 == 0 {
        (sorted[middle - 1] + sorted[middle]) / 2.0
    } else {
        sorted[middle]
    })
}

/// Spread of the latencies, from per row extremes when available
pub fn latency_range<'a, I>(records: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a RunRecord> + Clone,
{
    let max = records
        .clone()
        .into_iter()
        .filter_map(|record| record.max_ms)
        .reduce(f64::max);
    let min = records
        .clone()
        .into_iter()
        .filter_map(|record| record.min_ms)
        .reduce(f64::min);

    match (max, min) {
        (Some(max), Some(min)) => Some(max - min),
        _ => {
            let means = records.into_iter().filter_map(|record| record.mean_ms);
            let (min, max) = means.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });

            (min <= max).then(|| max - min)
        }
    }
}

type ConfigGroups<'a> = BTreeMap<(i64, i64, &'a str, i64), Vec<&'a RunRecord>>;

fn config_groups(rows: &[RunRecord]) -> ConfigGroups<'_> {
    let mut groups = ConfigGroups::new();

    for record in rows {
        groups
            .entry((record.scale, record.cluster, record.phase.as_str(), record.worker))
            .or_default()
            .push(record);
    }

    groups
}

/// one import speed per run, runs repeat it on every row
fn import_samples(records: &[&RunRecord]) -> Vec<f64> {
    records
        .iter()
        .filter_map(|record| record.import_speed.map(|speed| (record.run_id.as_str(), speed)))
        .unique_by(|(run_id, _)| *run_id)
        .map(|(_, speed)| speed)
        .collect()
}

/// Check every configuration has an import speed and a latency sample for
/// every query type seen anywhere in the rows. All problems are collected.
pub fn validate_completeness(rows: &[RunRecord]) -> Result<(), DeriveError> {
    let all_query_types = rows
        .iter()
        .map(|record| record.query_type.as_str())
        .collect::<BTreeSet<_>>();
    let mut problems = Vec::new();

    for ((scale, cluster, phase, worker), records) in config_groups(rows) {
        let key = config_key(scale, cluster, phase, worker);

        match import_samples(&records).len() {
            0 => problems.push(format!("Configuration {key}: Missing import_speed data")),
            1 => warn!("Configuration {key}: only one import_speed sample, no trimming possible"),
            _ => {}
        }

        for query_type in all_query_types.iter() {
            let samples = records
                .iter()
                .filter(|record| record.query_type == *query_type)
                .collect_vec();

            if samples.is_empty() {
                problems.push(format!(
                    "Configuration {key}: Missing query_type '{query_type}' data"
                ));
            } else if samples.iter().all(|record| record.mean_ms.is_none()) {
                problems.push(format!(
                    "Configuration {key}: Query type '{query_type}' has no valid mean_ms values"
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(DeriveError::Incomplete(problems))
    }
}

/// config key -> value name -> computation
pub type CalculationLog = BTreeMap<String, BTreeMap<String, TrimmedMean>>;

/// A derived baseline document and how every value came to be
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derivation {
    pub baselines: BaselineDocument,
    pub calculation_log: CalculationLog,
}

/// Rows of one branch whose run date lies within `[start, end]`
pub fn select_window(rows: &[RunRecord], start: NaiveDate, end: NaiveDate, branch: &str) -> Vec<RunRecord> {
    rows.iter()
        .filter(|record| {
            let date = record.timestamp.date();

            record.branch == branch && date >= start && date <= end
        })
        .cloned()
        .collect()
}

/// Derive a baseline document, one entry per configuration
pub fn derive(rows: &[RunRecord], format: BaselineFormat, validate: bool) -> Result<Derivation, DeriveError> {
    if rows.is_empty() {
        return Err(DeriveError::NoData);
    }
    if validate {
        validate_completeness(rows)?;
    }

    let mut derivation = Derivation::default();

    for ((scale, cluster, phase, worker), records) in config_groups(rows) {
        let key = config_key(scale, cluster, phase, worker);
        let mut entry = BaselineEntry::default();
        let log = derivation.calculation_log.entry(key.clone()).or_default();

        match trimmed_mean(&import_samples(&records)) {
            Some(import_speed) => {
                entry.import_speed = Some(import_speed.result);
                log.insert("import_speed".to_owned(), import_speed);
            }
            None => warn!("Configuration {key}: no import_speed, leaving it out"),
        }

        let mut by_metric: BTreeMap<String, Vec<&RunRecord>> = BTreeMap::new();
        for record in records.iter() {
            by_metric
                .entry(metric_key(&record.query_type))
                .or_default()
                .push(record);
        }

        for (metric, samples) in by_metric {
            let means = samples.iter().filter_map(|record| record.mean_ms).collect_vec();
            let Some(mean_ms) = trimmed_mean(&means) else {
                debug!("Configuration {key}: {metric} has no mean_ms samples");
                continue;
            };

            let value = match format {
                BaselineFormat::Legacy => MetricBaseline::Legacy(mean_ms.result),
                BaselineFormat::Scoring => {
                    let medians = samples.iter().filter_map(|record| record.med_ms).collect_vec();
                    let med_ms = trimmed_mean(&medians);

                    let value = MetricBaseline::Scoring(QueryBaseline {
                        mean_ms: Some(mean_ms.result),
                        med_ms: med_ms.as_ref().map(|med| med.result),
                        std_ms: Some(sample_std(&means)),
                        range_ms: latency_range(samples.iter().copied()),
                    });
                    if let Some(med_ms) = med_ms {
                        log.insert(format!("{metric}.med_ms"), med_ms);
                    }

                    value
                }
            };

            log.insert(metric.clone(), mean_ms);
            entry.metrics.insert(metric, value);
        }

        derivation.baselines.insert(key, entry);
    }

    info!(
        configurations = derivation.baselines.len(),
        format = %format,
        "Derived baseline"
    );

    Ok(derivation)
}
