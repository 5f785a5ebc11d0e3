//! Data models for the weather pipeline.
//!
//! The field set of a [`WeatherRecord`] is not known until the feed header is
//! read, so a record is an ordered list of `(name, value)` pairs rather than a
//! fixed struct. Missing readings are kept distinct from a legitimate `0.0`.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---

/// Name of the header column carrying the observation time.
pub const TIMESTAMP_FIELD: &str = "TIMESTAMP";

/// Key under which the derived instant is carried in serialized records.
/// Reserved: the parser renames a feed column of this name to
/// [`RENAMED_INSTANT_COLUMN`].
pub const INSTANT_KEY: &str = "date";

/// Field name given to a feed column that collides with [`INSTANT_KEY`].
pub const RENAMED_INSTANT_COLUMN: &str = "date_raw";

/// Well-known channel names used by the detectors and series helpers.
pub mod channels {
    pub const BATTERY_MIN: &str = "batt_volt_Min";
    pub const AIR_TEMPERATURE: &str = "airtemp_Avg";
    pub const RELATIVE_HUMIDITY: &str = "relhumidity_Avg";
    pub const AIR_PRESSURE: &str = "airpressure_Avg";
    pub const RAIN_INTENSITY: &str = "Rintensity_Tot";
    pub const WIND_SPEED: &str = "WS_ms_S_WVT";
    pub const WIND_DIRECTION: &str = "WindDir_D1_WVT";
}

/// One cell of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    // ---
    Number(f64),
    /// Raw text, only used for the `TIMESTAMP` column.
    Text(String),
    Missing,
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Missing => serializer.serialize_none(),
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => {
                n.as_f64().map_or(FieldValue::Missing, FieldValue::Number)
            }
            serde_json::Value::String(s) => FieldValue::Text(s),
            _ => FieldValue::Missing,
        }
    }
}

/// A single observation instant with its channel readings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherRecord {
    // ---
    fields: Vec<(String, FieldValue)>,
    instant: Option<DateTime<Utc>>,
}

impl WeatherRecord {
    // ---
    pub fn new(fields: Vec<(String, FieldValue)>, instant: Option<DateTime<Utc>>) -> Self {
        Self { fields, instant }
    }

    /// Raw `TIMESTAMP` text as it appeared in the feed.
    pub fn timestamp(&self) -> Option<&str> {
        match self.get(TIMESTAMP_FIELD) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Absolute instant derived from `TIMESTAMP`, if it could be parsed.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        self.instant
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Numeric reading for `name`; `None` when absent or missing.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_number)
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    /// Replace the value of an existing field, or append it.
    pub fn set(&mut self, name: &str, value: FieldValue) {
        match self.fields.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Text used when an anomaly message needs to name this record.
    pub fn label(&self) -> String {
        // ---
        match (self.timestamp(), self.instant) {
            (Some(raw), _) => raw.to_string(),
            (None, Some(instant)) => instant.to_rfc3339(),
            (None, None) => "unknown time".to_string(),
        }
    }
}

impl Serialize for WeatherRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // ---
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(INSTANT_KEY, &self.instant)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for WeatherRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = WeatherRecord;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of field names to numbers, strings or null")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        // ---
        let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(16));
        let mut instant = None;

        while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
            if key == INSTANT_KEY {
                instant = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                continue;
            }
            fields.push((key, FieldValue::from(value)));
        }

        Ok(WeatherRecord { fields, instant })
    }
}

// ---

/// Channel an anomaly was raised against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Battery,
    Temperature,
    Humidity,
    Pressure,
    MissingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A derived finding. Recomputed on every detection pass, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    // ---
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
}

// ---

/// Symbolic time-window selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RangeTag {
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "1m")]
    Month,
}

impl RangeTag {
    /// Parse a tag; anything unrecognised selects the 24h window.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "3d" => RangeTag::ThreeDays,
            "1w" => RangeTag::Week,
            "1m" => RangeTag::Month,
            _ => RangeTag::Day,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeTag::Day => "24h",
            RangeTag::ThreeDays => "3d",
            RangeTag::Week => "1w",
            RangeTag::Month => "1m",
        }
    }

    pub fn lookback(&self) -> Duration {
        match self {
            RangeTag::Day => Duration::hours(24),
            RangeTag::ThreeDays => Duration::hours(72),
            RangeTag::Week => Duration::hours(168),
            RangeTag::Month => Duration::hours(720),
        }
    }

    /// Keep one record out of every `stride()` when downsampling.
    pub fn stride(&self) -> usize {
        match self {
            RangeTag::Day => 1,
            RangeTag::ThreeDays => 30,
            RangeTag::Week => 60,
            RangeTag::Month => 180,
        }
    }
}

impl fmt::Display for RangeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_record() -> WeatherRecord {
        // ---
        WeatherRecord::new(
            vec![
                (
                    TIMESTAMP_FIELD.to_string(),
                    FieldValue::Text("2025-05-01 12:00:00".to_string()),
                ),
                (channels::AIR_TEMPERATURE.to_string(), FieldValue::Number(0.0)),
                (channels::RELATIVE_HUMIDITY.to_string(), FieldValue::Missing),
            ],
            Some(Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()),
        )
    }

    #[test]
    fn test_missing_is_not_zero() {
        // ---
        let record = create_test_record();

        assert_eq!(record.number(channels::AIR_TEMPERATURE), Some(0.0));
        assert_eq!(record.number(channels::RELATIVE_HUMIDITY), None);
        assert!(record.get(channels::RELATIVE_HUMIDITY).unwrap().is_missing());
        assert_eq!(record.get("no_such_field"), None);
    }

    #[test]
    fn test_serde_keeps_field_order_and_instant() {
        // ---
        let record = create_test_record();
        let json = serde_json::to_string(&record).unwrap();

        assert_eq!(
            json,
            r#"{"TIMESTAMP":"2025-05-01 12:00:00","airtemp_Avg":0.0,"relhumidity_Avg":null,"date":"2025-05-01T12:00:00Z"}"#
        );

        let back: WeatherRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_set_replaces_in_place() {
        // ---
        let mut record = create_test_record();
        record.set(channels::AIR_TEMPERATURE, FieldValue::Missing);

        let names: Vec<&str> = record.field_names().collect();
        assert_eq!(names, vec![TIMESTAMP_FIELD, "airtemp_Avg", "relhumidity_Avg"]);
        assert_eq!(record.number(channels::AIR_TEMPERATURE), None);
    }

    #[test]
    fn test_range_tags() {
        // ---
        assert_eq!(RangeTag::from_tag("3d"), RangeTag::ThreeDays);
        assert_eq!(RangeTag::from_tag("1w").lookback(), Duration::hours(168));
        assert_eq!(RangeTag::from_tag("1m").stride(), 180);
        assert_eq!(RangeTag::from_tag("2y"), RangeTag::Day);
        assert_eq!(RangeTag::from_tag("").lookback(), Duration::hours(24));
    }

    #[test]
    fn test_anomaly_wire_names() {
        // ---
        let anomaly = Anomaly {
            timestamp: "t".to_string(),
            kind: AnomalyKind::MissingData,
            severity: Severity::Info,
            message: "m".to_string(),
        };
        let value = serde_json::to_value(&anomaly).unwrap();

        assert_eq!(value["type"], "missing_data");
        assert_eq!(value["severity"], "info");
    }
}
