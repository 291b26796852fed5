//! Baseline uploads in CSV form.
//!
//! Two layouts are accepted. The tabular one has a `Scale` first header and
//! one configuration per row:
//!
//! ```text
//! Scale,Cluster,Execution Type,Workers,Import Speed,cpu-max-all-1,...
//! 100,3,query,8,1500000,12.5,...
//! ```
//!
//! The transposed one has one configuration per column; the leading rows
//! carry execution type, cluster, scale and workers, every following row is
//! a metric named by its first cell.

use crate::{
    baseline::{BaselineDocument, BaselineEntry, BaselineError, MetricBaseline},
    canonical::metric_key,
};
use csv::{ReaderBuilder, Trim};
use tracing::warn;
use tsbs_report_ingest::config_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parameter {
    Scale,
    Cluster,
    Phase,
    Worker,
}

fn parameter(label: &str) -> Option<Parameter> {
    match label.trim().to_lowercase().replace('_', " ").as_str() {
        "scale" => Some(Parameter::Scale),
        "cluster" => Some(Parameter::Cluster),
        "execution type" | "exec type" | "phase" => Some(Parameter::Phase),
        "workers" | "worker" => Some(Parameter::Worker),
        _ => None,
    }
}

fn is_import(label: &str) -> bool {
    label.to_lowercase().contains("import")
}

fn parse_int(value: &str, what: &str) -> Result<i64, BaselineError> {
    let value = value.trim();

    value
        .parse::<i64>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0)
                .map(|v| v as i64)
        })
        .ok_or_else(|| BaselineError::InvalidCsv(format!("{what} is not an integer: {value:?}")))
}

/// numeric metric cell, blanks are skipped and garbage is logged
fn parse_value(value: &str, metric: &str) -> Option<f64> {
    let value = value.trim();

    if value.is_empty() {
        return None;
    }
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Some(parsed),
        _ => {
            warn!(metric = metric, value = value, "Skipped non numeric baseline value");
            None
        }
    }
}

#[derive(Debug, Default)]
struct Configuration {
    scale: Option<i64>,
    cluster: Option<i64>,
    phase: Option<String>,
    worker: Option<i64>,
    entry: BaselineEntry,
}

impl Configuration {
    fn set(&mut self, parameter: Parameter, value: &str) -> Result<(), BaselineError> {
        match parameter {
            _ if value.trim().is_empty() => {}
            Parameter::Scale => self.scale = Some(parse_int(value, "scale")?),
            Parameter::Cluster => self.cluster = Some(parse_int(value, "cluster")?),
            Parameter::Worker => self.worker = Some(parse_int(value, "workers")?),
            Parameter::Phase => self.phase = Some(value.trim().to_owned()),
        }

        Ok(())
    }

    fn set_metric(&mut self, label: &str, value: &str) {
        let Some(value) = parse_value(value, label) else {
            return;
        };

        if is_import(label) {
            self.entry.import_speed = Some(value);
        } else {
            self.entry
                .metrics
                .insert(metric_key(label.trim()), MetricBaseline::Legacy(value));
        }
    }

    fn is_blank(&self) -> bool {
        self.scale.is_none()
            && self.cluster.is_none()
            && self.phase.as_deref().map_or(true, str::is_empty)
            && self.worker.is_none()
            && self.entry == BaselineEntry::default()
    }

    fn into_keyed(self, position: usize) -> Result<(String, BaselineEntry), BaselineError> {
        match (self.scale, self.cluster, self.phase, self.worker) {
            (Some(scale), Some(cluster), Some(phase), Some(worker)) if !phase.is_empty() => {
                Ok((config_key(scale, cluster, &phase, worker), self.entry))
            }
            _ => Err(BaselineError::InvalidCsv(format!(
                "configuration {position} lacks scale, cluster, execution type or workers"
            ))),
        }
    }
}

fn read_records(text: &str) -> Result<Vec<Vec<String>>, BaselineError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;

        if record.iter().any(|field| !field.is_empty()) {
            records.push(record.iter().map(str::to_owned).collect());
        }
    }

    Ok(records)
}

/// Convert an uploaded CSV into a baseline document of legacy entries
pub fn parse_baseline_csv(text: &str) -> Result<BaselineDocument, BaselineError> {
    let records = read_records(text)?;
    let Some(header) = records.first() else {
        return Err(BaselineError::InvalidCsv("file is empty".to_owned()));
    };

    if header.first().and_then(|label| parameter(label)) == Some(Parameter::Scale) {
        parse_tabular(&records)
    } else {
        parse_transposed(&records)
    }
}

fn parse_tabular(records: &[Vec<String>]) -> Result<BaselineDocument, BaselineError> {
    let (header, rows) = records
        .split_first()
        .ok_or_else(|| BaselineError::InvalidCsv("file is empty".to_owned()))?;
    let mut document = BaselineDocument::new();

    for (position, row) in rows.iter().enumerate() {
        let mut configuration = Configuration::default();

        for (label, value) in header.iter().zip(row.iter()) {
            match parameter(label) {
                Some(parameter) => configuration.set(parameter, value)?,
                None => configuration.set_metric(label, value),
            }
        }

        if configuration.is_blank() {
            continue;
        }
        let (key, entry) = configuration.into_keyed(position + 1)?;
        document.insert(key, entry);
    }

    Ok(document)
}

fn parse_transposed(records: &[Vec<String>]) -> Result<BaselineDocument, BaselineError> {
    // without labels the parameter rows follow the header in this order
    const POSITIONAL: [Parameter; 4] = [
        Parameter::Phase,
        Parameter::Cluster,
        Parameter::Scale,
        Parameter::Worker,
    ];

    // a labelled header row already is the execution type row
    let body = match records.first() {
        Some(header) if header.first().and_then(|label| parameter(label)).is_some() => records,
        Some(_) => &records[1..],
        None => return Err(BaselineError::InvalidCsv("file is empty".to_owned())),
    };
    let labelled = body
        .iter()
        .any(|row| row.first().and_then(|label| parameter(label)).is_some());
    let width = records.iter().map(Vec::len).max().unwrap_or(0);
    let mut configurations = (1..width)
        .map(|_| Configuration::default())
        .collect::<Vec<_>>();

    for (index, row) in body.iter().enumerate() {
        let label = row.first().map(String::as_str).unwrap_or_default();
        let parameter = if labelled {
            parameter(label)
        } else {
            POSITIONAL.get(index).copied()
        };

        for (configuration, value) in configurations.iter_mut().zip(row.iter().skip(1)) {
            match parameter {
                Some(parameter) => configuration.set(parameter, value)?,
                None => configuration.set_metric(label, value),
            }
        }
    }

    configurations
        .into_iter()
        .enumerate()
        .filter(|(_, configuration)| !configuration.is_blank())
        .map(|(position, configuration)| configuration.into_keyed(position + 1))
        .collect()
}
