//! Tolerant reading of result CSV files.
//!
//! Result files come from many benchmark tool versions, so reading is a
//! cascade of increasingly forgiving strategies. The first strategy that
//! yields a non-empty table wins.

use csv::{ReaderBuilder, Trim};
use std::borrow::Cow;
use tracing::{debug, trace};

/// Untyped cells of a CSV file, headers kept as written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }
}

pub type Strategy = fn(&[u8]) -> Option<RawTable>;

/// all strategies in the order they are tried
pub const STRATEGIES: [(&str, Strategy); 4] = [
    ("strict", strict),
    ("sniffed", sniffed),
    ("reencoded", reencoded),
    ("repaired", repaired),
];

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Try every strategy in order, returning the winning strategy's name and table
pub fn load(bytes: &[u8]) -> Option<(&'static str, RawTable)> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let table = strategy(bytes).filter(|table| !table.is_empty());

        match &table {
            Some(table) => debug!(
                strategy = name,
                rows = table.rows.len(),
                columns = table.width(),
                "CSV strategy produced a table"
            ),
            None => trace!(strategy = name, "CSV strategy failed"),
        }

        table.map(|table| (*name, table))
    })
}

/// read all records, failing on any malformed line
fn read_exact(text: &str, delimiter: u8) -> Option<RawTable> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(Trim::None)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .ok()?
        .iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record.ok()?;

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        rows.push(record.iter().map(str::to_owned).collect());
    }

    Some(RawTable { headers, rows })
}

/// read all records, padding short rows with empty cells but rejecting long ones
fn read_padded(text: &str, delimiter: u8) -> Option<RawTable> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::None)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .ok()?
        .iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record.ok()?;

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() > headers.len() {
            return None;
        }

        let mut row = record.iter().map(str::to_owned).collect::<Vec<_>>();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Some(RawTable { headers, rows })
}

/// Comma separated UTF-8 where every row matches the header width.
/// A single header column is treated as a failure since it points at a
/// different delimiter.
pub fn strict(bytes: &[u8]) -> Option<RawTable> {
    let text = std::str::from_utf8(bytes).ok()?;

    read_exact(text, b',').filter(|table| table.width() > 1)
}

/// pick the delimiter that occurs most often in the first non-empty line
pub fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default();

    DELIMITERS
        .iter()
        .map(|delimiter| {
            let count = first_line
                .bytes()
                .filter(|byte| byte == delimiter)
                .count();
            (count, *delimiter)
        })
        // max_by_key keeps the last maximum, prefer earlier delimiters on ties
        .rev()
        .max_by_key(|(count, _)| *count)
        .filter(|(count, _)| *count > 0)
        .map_or(b',', |(_, delimiter)| delimiter)
}

/// UTF-8 with an auto detected delimiter
pub fn sniffed(bytes: &[u8]) -> Option<RawTable> {
    let text = std::str::from_utf8(bytes).ok()?;

    read_padded(text, sniff_delimiter(text))
}

/// Comma separated, decoded as UTF-8 (without BOM) or otherwise as Latin-1
pub fn reencoded(bytes: &[u8]) -> Option<RawTable> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(decode_latin1(bytes)),
    };

    read_padded(&text, b',')
}

/// Line by line recovery: lossy decoding, naive comma splitting and rows
/// padded or truncated to the header width
pub fn repaired(bytes: &[u8]) -> Option<RawTable> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

    let headers = lines
        .next()?
        .split(',')
        .map(str::to_owned)
        .collect::<Vec<_>>();
    let rows = lines
        .map(|line| {
            let mut row = line.split(',').map(str::to_owned).collect::<Vec<_>>();
            row.resize(headers.len(), String::new());
            row
        })
        .collect();

    Some(RawTable { headers, rows })
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| char::from(*byte)).collect()
}
