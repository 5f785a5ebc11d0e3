//! Parser for the logger's delimited `.dat` feed.
//!
//! Layout:
//! - line 0: file/device metadata (ignored)
//! - line 1: quoted, comma separated header naming each field
//! - lines 2-3: units and aggregation metadata (ignored)
//! - lines 4..: one observation per line, positionally aligned with the header

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

use crate::error::ParseError;
use crate::models::{
    FieldValue, WeatherRecord, INSTANT_KEY, RENAMED_INSTANT_COLUMN, TIMESTAMP_FIELD,
};

// ---

const HEADER_LINE: usize = 1;
const FIRST_DATA_LINE: usize = 4;

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Converts feed text into typed records.
#[derive(Debug, Clone, Copy)]
pub struct RecordParser {
    /// Offset the logger clock runs at; applied to naive timestamps.
    offset: FixedOffset,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::with_offset(Utc.fix())
    }
}

impl RecordParser {
    // ---
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build a parser from an offset in minutes east of UTC. Out of range
    /// values fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(offset) => Self::with_offset(offset),
            None => {
                tracing::warn!(minutes, "Feed UTC offset out of range, using UTC");
                Self::default()
            }
        }
    }

    /// Parse a full feed body.
    ///
    /// Every non-blank data line yields exactly one record whose field set is
    /// the header field set. Short lines leave trailing fields missing, extra
    /// cells are ignored.
    pub fn parse(&self, raw: &str) -> Result<Vec<WeatherRecord>, ParseError> {
        // ---
        let lines: Vec<&str> = raw.lines().collect();
        let header_line = lines.get(HEADER_LINE).ok_or(ParseError::MissingHeader)?;
        let headers: Vec<String> = split_line(header_line)
            .into_iter()
            .map(reserve_instant_key)
            .collect();

        if !headers.iter().any(|h| h == TIMESTAMP_FIELD) {
            return Err(ParseError::MissingTimestampColumn);
        }

        let records: Vec<WeatherRecord> = lines
            .iter()
            .skip(FIRST_DATA_LINE)
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| self.parse_line(&headers, line))
            .collect();

        tracing::debug!(
            fields = headers.len(),
            records = records.len(),
            "Parsed weather feed"
        );
        Ok(records)
    }

    fn parse_line(&self, headers: &[String], line: &str) -> WeatherRecord {
        // ---
        let values = split_line(line);
        if values.len() != headers.len() {
            tracing::trace!(
                expected = headers.len(),
                found = values.len(),
                "Data line column count differs from header"
            );
        }

        let mut instant = None;
        let fields = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let cell = values.get(i).map(String::as_str).unwrap_or("");
                let value = if header == TIMESTAMP_FIELD {
                    instant = self.parse_instant(cell);
                    FieldValue::Text(cell.to_string())
                } else {
                    parse_number(cell)
                };
                (header.clone(), value)
            })
            .collect();

        WeatherRecord::new(fields, instant)
    }

    /// Derive an absolute instant from a feed timestamp.
    pub fn parse_instant(&self, raw: &str) -> Option<DateTime<Utc>> {
        // ---
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// The serialized record carries its derived instant under `INSTANT_KEY`.
fn reserve_instant_key(header: String) -> String {
    if header == INSTANT_KEY {
        tracing::warn!(
            "Feed column '{}' renamed to '{}'",
            INSTANT_KEY,
            RENAMED_INSTANT_COLUMN
        );
        return RENAMED_INSTANT_COLUMN.to_string();
    }
    header
}

/// Strip quote characters and split on commas.
fn split_line(line: &str) -> Vec<String> {
    line.trim()
        .replace('"', "")
        .split(',')
        .map(|cell| cell.trim().to_string())
        .collect()
}

/// Non-numeric cells, empty cells and the logger's `NAN` marker are missing.
fn parse_number(cell: &str) -> FieldValue {
    match cell.parse::<f64>() {
        Ok(n) if n.is_finite() => FieldValue::Number(n),
        _ => FieldValue::Missing,
    }
}
