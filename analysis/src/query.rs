//! Filtered views over the dataset: table rows scored against a baseline
//! and chart series.

use crate::{
    baseline::{BaselineDocument, BaselineKind, BaselineStore},
    canonical::metric_key,
    derive::{latency_range, mean, median, sample_std},
    score::{
        composite_query_score, import_speed_score, performance_pct, performance_pct_reverse,
        round2, QueryStats,
    },
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};
use tracing::{debug, warn};
use tsbs_report_ingest::{DatasetStore, RowFilter, RunRecord};

pub const DEFAULT_METRIC: &str = "mean_ms";
pub const DEFAULT_TABLE_LIMIT: usize = 1000;

const TABLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CHART_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A filter value as sent by clients, numbers may arrive as strings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FilterValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            Self::Float(_) => None,
            Self::Text(text) => text.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterRequest {
    pub branches: Option<Vec<FilterValue>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub scales: Option<Vec<FilterValue>>,
    pub clusters: Option<Vec<FilterValue>>,
    pub query_types: Option<Vec<FilterValue>>,
    pub workers: Option<Vec<FilterValue>>,
    pub execution_types: Option<Vec<FilterValue>>,
    pub metric: Option<String>,
    pub baseline_type: Option<String>,
}

fn text_set(values: &Option<Vec<FilterValue>>) -> Option<BTreeSet<String>> {
    values
        .as_ref()
        .filter(|values| !values.is_empty())
        .map(|values| values.iter().map(FilterValue::as_text).collect())
}

/// all or nothing: one bad entry drops the whole dimension
fn int_set(values: &Option<Vec<FilterValue>>, dimension: &str) -> Option<BTreeSet<i64>> {
    let values = values.as_ref().filter(|values| !values.is_empty())?;
    let parsed = values.iter().map(FilterValue::as_int).collect::<Option<BTreeSet<_>>>();

    if parsed.is_none() {
        warn!(dimension = dimension, "Ignoring filter with non integer values");
    }

    parsed
}

fn parse_date(value: &Option<String>, field: &str) -> Option<NaiveDate> {
    let value = value.as_deref().map(str::trim).filter(|value| !value.is_empty())?;

    match NaiveDate::parse_from_str(value, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(error) => {
            warn!(field = field, value = value, error = ?error, "Ignoring unparseable date");
            None
        }
    }
}

impl FilterRequest {
    pub fn metric(&self) -> &str {
        self.metric
            .as_deref()
            .filter(|metric| !metric.is_empty())
            .unwrap_or(DEFAULT_METRIC)
    }

    /// selected baseline, unknown kinds fall back to master
    pub fn baseline_kind(&self) -> BaselineKind {
        match self.baseline_type.as_deref() {
            None | Some("") => BaselineKind::Master,
            Some(kind) => kind.parse().unwrap_or_else(|_| {
                warn!(baseline_type = kind, "Unknown baseline type, using master");
                BaselineKind::Master
            }),
        }
    }

    pub fn row_filter(&self) -> RowFilter {
        RowFilter {
            branches: text_set(&self.branches),
            query_types: text_set(&self.query_types),
            phases: text_set(&self.execution_types),
            scales: int_set(&self.scales, "scales"),
            clusters: int_set(&self.clusters, "clusters"),
            workers: int_set(&self.workers, "workers"),
            start: parse_date(&self.start_date, "start_date").and_then(start_of_day),
            // inclusive end date, so everything before the next midnight
            end: parse_date(&self.end_date, "end_date")
                .and_then(start_of_day)
                .map(|midnight| midnight + Duration::days(1)),
        }
    }
}

fn start_of_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

/// Rows compared against each other: same branch, configuration and query
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub branch: String,
    pub scale: i64,
    pub cluster: i64,
    pub worker: i64,
    pub phase: String,
    pub query_type: String,
}

impl GroupKey {
    pub fn of(record: &RunRecord) -> Self {
        Self {
            branch: record.branch.clone(),
            scale: record.scale,
            cluster: record.cluster,
            worker: record.worker,
            phase: record.phase.clone(),
            query_type: record.query_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupStats {
    // absent when no row of the group has a mean latency
    pub query: Option<QueryStats>,
    pub import_speed: Option<f64>,
}

/// Per group latency statistics and mean import speed
pub fn group_statistics(rows: &[RunRecord]) -> BTreeMap<GroupKey, GroupStats> {
    rows.iter()
        .into_group_map_by(|record| GroupKey::of(record))
        .into_iter()
        .map(|(key, records)| {
            let means = records.iter().filter_map(|record| record.mean_ms).collect_vec();
            let speeds = records.iter().filter_map(|record| record.import_speed).collect_vec();

            let query = median(&means).map(|med_ms| QueryStats {
                mean_ms: mean(&means),
                med_ms,
                std_ms: sample_std(&means),
                range_ms: latency_range(records.iter().copied()).unwrap_or(0.0),
            });
            let import_speed = (!speeds.is_empty()).then(|| mean(&speeds));

            (key, GroupStats { query, import_speed })
        })
        .collect()
}

/// Baseline derived fields of a row, only present when computable
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RowScores {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_speed_baseline_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_speed_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_comprehensive_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_mean_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_median_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_std_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_range_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_ms_baseline_pct: Option<f64>,
}

/// Score one row against its configuration's baseline entry
pub fn score_row(record: &RunRecord, stats: &GroupStats, baselines: &BaselineDocument) -> RowScores {
    let mut scores = RowScores::default();
    let Some(entry) = baselines.get(&record.config_key()) else {
        return scores;
    };

    if let Some(baseline) = entry.import_speed {
        scores.import_speed_baseline_pct = record
            .import_speed
            .and_then(|actual| performance_pct(actual, baseline))
            .map(round2);
        scores.import_speed_score = stats
            .import_speed
            .and_then(|actual| import_speed_score(actual, baseline))
            .map(round2);
    }

    if let Some(baseline) = entry.query_baseline(&metric_key(&record.query_type)) {
        scores.mean_ms_baseline_pct = record
            .mean_ms
            .zip(baseline.mean_ms)
            .and_then(|(actual, baseline)| performance_pct_reverse(actual, baseline))
            .map(round2);

        if let Some(composite) = stats
            .query
            .as_ref()
            .and_then(|observed| composite_query_score(observed, &baseline))
        {
            scores.query_comprehensive_score = Some(round2(composite.comprehensive));
            scores.query_mean_score = composite.mean.map(round2);
            scores.query_median_score = composite.median.map(round2);
            scores.query_std_score = composite.std.map(round2);
            scores.query_range_score = composite.range.map(round2);
        }
    }

    scores
}

/// A dataset row as shown in the table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub run_id: String,
    pub datetime: String,
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
    #[serde(flatten)]
    pub scores: RowScores,
}

impl TableRow {
    pub fn new(record: &RunRecord, scores: RowScores) -> Self {
        Self {
            run_id: record.run_id.clone(),
            datetime: record.timestamp.format(TABLE_TIME_FORMAT).to_string(),
            branch: record.branch.clone(),
            scale: record.scale,
            cluster: record.cluster,
            worker: record.worker,
            phase: record.phase.clone(),
            query_type: record.query_type.clone(),
            min_ms: record.min_ms,
            mean_ms: record.mean_ms,
            max_ms: record.max_ms,
            med_ms: record.med_ms,
            query_count: record.query_count,
            import_speed: record.import_speed,
            test_type: record.test_type.clone(),
            wal: record.wal.clone(),
            replica: record.replica,
            dop: record.dop,
            scores,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Vec<(String, f64)>,
}

/// value of a chartable metric; `None` for metrics that are not columns
pub fn metric_value(record: &RunRecord, metric: &str) -> Option<Option<f64>> {
    Some(match metric {
        "min_ms" => record.min_ms,
        "mean_ms" => record.mean_ms,
        "max_ms" => record.max_ms,
        "med_ms" => record.med_ms,
        "query_count" => record.query_count,
        "import_speed" => record.import_speed,
        "worker" => Some(record.worker as f64),
        "dop" => Some(record.dop as f64),
        _ => return None,
    })
}

/// One line per (branch, query type); points aggregate all rows sharing a
/// timestamp, by max for import speed and by mean otherwise
pub fn prepare_chart_data(rows: &[RunRecord], metric: &str) -> BTreeMap<String, ChartSeries> {
    let mut points: BTreeMap<(&str, &str), BTreeMap<NaiveDateTime, Vec<f64>>> = BTreeMap::new();

    for record in rows {
        let Some(value) = metric_value(record, metric) else {
            debug!(metric = metric, "Unknown chart metric");
            return BTreeMap::new();
        };
        if let Some(value) = value {
            points
                .entry((record.branch.as_str(), record.query_type.as_str()))
                .or_default()
                .entry(record.timestamp)
                .or_default()
                .push(value);
        }
    }

    points
        .into_iter()
        .map(|((branch, query_type), series)| {
            let data = series
                .into_iter()
                .map(|(timestamp, values)| {
                    let value = if metric == "import_speed" {
                        values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                    } else {
                        mean(&values)
                    };

                    (timestamp.format(CHART_TIME_FORMAT).to_string(), value)
                })
                .collect();

            (
                format!("{branch}_{query_type}"),
                ChartSeries {
                    name: format!("{branch} - {query_type}"),
                    kind: "line",
                    data,
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterResponse {
    pub table_data: Vec<TableRow>,
    pub chart_data: BTreeMap<String, ChartSeries>,
    pub total_records: usize,
    // seconds
    pub processing_time: f64,
}

/// Build the table and charts for rows already filtered
pub fn build_response(
    rows: &[RunRecord],
    baselines: &BaselineDocument,
    metric: &str,
    table_limit: usize,
) -> FilterResponse {
    let started = Instant::now();
    let stats = group_statistics(rows);

    let table_data = rows
        .iter()
        .take(table_limit)
        .map(|record| {
            let group = stats.get(&GroupKey::of(record)).copied().unwrap_or_default();
            TableRow::new(record, score_row(record, &group, baselines))
        })
        .collect();

    FilterResponse {
        table_data,
        chart_data: prepare_chart_data(rows, metric),
        total_records: rows.len(),
        processing_time: started.elapsed().as_secs_f64(),
    }
}

/// Answer a filter request against the current dataset
#[tracing::instrument(level = "debug", skip(store, baselines))]
pub fn run_query(
    store: &DatasetStore,
    baselines: &BaselineStore,
    request: &FilterRequest,
    table_limit: usize,
) -> FilterResponse {
    let started = Instant::now();
    let rows = store.get_data_filtered(&request.row_filter());
    let document = baselines.load(request.baseline_kind());

    let mut response = build_response(&rows, &document, request.metric(), table_limit);
    response.processing_time = started.elapsed().as_secs_f64();

    debug!(
        rows = response.total_records,
        elapsed = response.processing_time,
        "Answered filter request"
    );

    response
}
