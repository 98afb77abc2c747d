//! Turns a per-model history stream into a chart-ready series.

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use shared::{
    domain::{HistoryKind, HistoryRecord},
    protocol::RawHistoryRecord,
};
use thiserror::Error;

const LABEL_FORMAT: &str = "%m/%d %H:%M";
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("history record {index} has a non-numeric value: {value}")]
    NonNumericValue { index: usize, value: String },
    #[error("history record {index} has an unparsable timestamp: {raw}")]
    UnparsableTimestamp { index: usize, raw: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    labels: Vec<String>,
    values: Vec<f64>,
    series_label: &'static str,
}

impl ChartSeries {
    pub fn empty() -> Self {
        Self {
            labels: Vec::new(),
            values: Vec::new(),
            series_label: HistoryKind::default().series_label(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn series_label(&self) -> &str {
        self.series_label
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Hosts render an explicit "no data" state for an empty series.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (&str, f64)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

impl Default for ChartSeries {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builds the chart series for a history stream received in any order.
///
/// Every record is validated first; a single bad value or timestamp rejects
/// the whole stream. Records are then stably sorted by timestamp, so records
/// sharing a timestamp keep their arrival order. The series label follows the
/// chronologically first record's type; mixed-type streams are not reconciled.
pub fn build_series(records: &[RawHistoryRecord]) -> Result<ChartSeries, ValidationError> {
    let mut parsed = records
        .iter()
        .enumerate()
        .map(|(index, raw)| parse_record(index, raw))
        .collect::<Result<Vec<_>, _>>()?;
    parsed.sort_by_key(|record| record.timestamp);

    let series_label = parsed
        .first()
        .map(|record| record.kind)
        .unwrap_or_default()
        .series_label();

    Ok(ChartSeries {
        labels: parsed
            .iter()
            .map(|record| record.timestamp.format(LABEL_FORMAT).to_string())
            .collect(),
        values: parsed.iter().map(|record| record.value).collect(),
        series_label,
    })
}

fn parse_record(index: usize, raw: &RawHistoryRecord) -> Result<HistoryRecord, ValidationError> {
    let timestamp = raw
        .timestamp
        .as_str()
        .and_then(parse_timestamp)
        .ok_or_else(|| ValidationError::UnparsableTimestamp {
            index,
            raw: render(&raw.timestamp),
        })?;
    let value = raw
        .value
        .as_f64()
        .ok_or_else(|| ValidationError::NonNumericValue {
            index,
            value: render(&raw.value),
        })?;

    Ok(HistoryRecord {
        timestamp,
        value,
        kind: HistoryKind::from_wire(raw.kind.as_deref()),
    })
}

/// Offset-bearing timestamps are normalized to UTC; naive ones are kept as written.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_utc());
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
