use crate::record::{RunMetadata, UNKNOWN_PHASE};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::str::FromStr;

/// date, branch, scale, cluster, test type, phase, wal, replica and dop
static STRICT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]{4})_([0-9]{2})([0-9]{2})_([0-9]{6})_(.*?)_scale([0-9]+)_cluster([0-9]+)_([a-zA-Z]+?[0-9]*)_([a-zA-Z]+)_(wal[0-9]+)_replica([0-9]+)_dop([0-9]+)",
    )
    .expect("strict run directory pattern")
});

/// date, branch, scale, cluster and dop with anything in between
static FALLBACK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]{4})_([0-9]{2})([0-9]{2})_([0-9]{6})_(.*?)_scale([0-9]+)_cluster([0-9]+)_.+_dop([0-9]+)",
    )
    .expect("fallback run directory pattern")
});

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

fn parse_timestamp(captures: &Captures) -> Option<NaiveDateTime> {
    let raw = format!(
        "{}{}{}_{}",
        &captures[1], &captures[2], &captures[3], &captures[4]
    );

    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).ok()
}

fn number<T: FromStr>(captures: &Captures, index: usize) -> Option<T> {
    captures[index].parse().ok()
}

/// Parse a run directory name into its metadata.
///
/// The strict pattern is tried first, the fallback pattern only recovers
/// date, branch, scale, cluster and dop and marks the phase as unknown.
/// Invalid calendar values or numbers that do not fit return `None`.
pub fn parse(name: &str) -> Option<RunMetadata> {
    if let Some(captures) = STRICT_PATTERN.captures(name) {
        return Some(RunMetadata {
            run_id: name.to_owned(),
            timestamp: parse_timestamp(&captures)?,
            branch: captures[5].to_owned(),
            scale: number(&captures, 6)?,
            cluster: number(&captures, 7)?,
            phase: captures[9].to_owned(),
            test_type: Some(captures[8].to_owned()),
            wal: Some(captures[10].to_owned()),
            replica: Some(number(&captures, 11)?),
            dop: number(&captures, 12)?,
        });
    }

    let captures = FALLBACK_PATTERN.captures(name)?;

    Some(RunMetadata {
        run_id: name.to_owned(),
        timestamp: parse_timestamp(&captures)?,
        branch: captures[5].to_owned(),
        scale: number(&captures, 6)?,
        cluster: number(&captures, 7)?,
        phase: UNKNOWN_PHASE.to_owned(),
        test_type: None,
        wal: None,
        replica: None,
        dop: number(&captures, 8)?,
    })
}
