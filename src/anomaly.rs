//! Rule-based anomaly detection over an ordered record sequence.
//!
//! Each rule is evaluated independently and the results are concatenated in
//! detector order: battery, temperature, humidity, pressure, missing data.
//! Within a rule, anomalies follow input order. Rules never fire on a missing
//! operand.

use chrono::Duration;
use serde::Serialize;

use crate::models::{channels, Anomaly, AnomalyKind, Severity, WeatherRecord};

// ---

/// Limits used by the detection rules.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Minimum battery voltage before a warning is raised.
    pub battery_min_volts: f64,
    /// Largest allowed change in air temperature between adjacent records.
    pub temperature_step: f64,
    /// Largest allowed change in air pressure (hPa) between adjacent records.
    pub pressure_step: f64,
    pub expected_interval: Duration,
    pub interval_tolerance: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            battery_min_volts: 12.0,
            temperature_step: 5.0,
            pressure_step: 10.0,
            expected_interval: Duration::minutes(2),
            interval_tolerance: Duration::seconds(30),
        }
    }
}

/// A single detection rule.
pub trait Rule: Send + Sync {
    /// Human-readable name for this rule
    fn name(&self) -> &str;

    /// Scan the records and return anomalies in input order
    fn detect(&self, records: &[WeatherRecord]) -> Vec<Anomaly>;
}

/// Flags records whose minimum battery voltage is below the threshold.
pub struct BatteryRule {
    min_volts: f64,
}

impl Rule for BatteryRule {
    fn name(&self) -> &str {
        "battery"
    }

    fn detect(&self, records: &[WeatherRecord]) -> Vec<Anomaly> {
        records
            .iter()
            .filter_map(|r| {
                let volts = r.number(channels::BATTERY_MIN)?;
                (volts < self.min_volts).then(|| Anomaly {
                    timestamp: r.label(),
                    kind: AnomalyKind::Battery,
                    severity: Severity::Warning,
                    message: format!("Low battery voltage detected: {}V at {}", volts, r.label()),
                })
            })
            .collect()
    }
}

/// Flags a jump in a channel between two adjacent records, attributed to the
/// later record. The time between the records is not considered.
pub struct StepRule {
    name: &'static str,
    channel: &'static str,
    kind: AnomalyKind,
    max_step: f64,
    unit: &'static str,
}

impl Rule for StepRule {
    fn name(&self) -> &str {
        self.name
    }

    fn detect(&self, records: &[WeatherRecord]) -> Vec<Anomaly> {
        // ---
        records
            .windows(2)
            .filter_map(|pair| {
                let prev = pair[0].number(self.channel)?;
                let curr = pair[1].number(self.channel)?;
                let delta = (curr - prev).abs();

                (delta > self.max_step).then(|| Anomaly {
                    timestamp: pair[1].label(),
                    kind: self.kind,
                    severity: Severity::Warning,
                    message: format!(
                        "Unusual {} change detected: {:.1}{} change at {}",
                        self.name,
                        delta,
                        self.unit,
                        pair[1].label()
                    ),
                })
            })
            .collect()
    }
}

/// Flags relative humidity outside [0, 100], which cannot be a real reading.
pub struct HumidityRule;

impl Rule for HumidityRule {
    fn name(&self) -> &str {
        "humidity"
    }

    fn detect(&self, records: &[WeatherRecord]) -> Vec<Anomaly> {
        records
            .iter()
            .filter_map(|r| {
                let humidity = r.number(channels::RELATIVE_HUMIDITY)?;
                (!(0.0..=100.0).contains(&humidity)).then(|| Anomaly {
                    timestamp: r.label(),
                    kind: AnomalyKind::Humidity,
                    severity: Severity::Error,
                    message: format!("Invalid humidity reading: {}% at {}", humidity, r.label()),
                })
            })
            .collect()
    }
}

/// Flags gaps between adjacent records longer than the sampling interval
/// plus tolerance, attributed to the earlier record.
pub struct GapRule {
    max_gap: Duration,
}

impl Rule for GapRule {
    fn name(&self) -> &str {
        "missing_data"
    }

    fn detect(&self, records: &[WeatherRecord]) -> Vec<Anomaly> {
        // ---
        records
            .windows(2)
            .filter_map(|pair| {
                let gap = pair[1].instant()? - pair[0].instant()?;
                (gap > self.max_gap).then(|| {
                    let minutes = (gap.num_milliseconds() as f64 / 60_000.0).round() as i64;
                    Anomaly {
                        timestamp: pair[0].label(),
                        kind: AnomalyKind::MissingData,
                        severity: Severity::Info,
                        message: format!(
                            "Data gap detected: Approximately {} minutes between {} and {}",
                            minutes,
                            pair[0].label(),
                            pair[1].label()
                        ),
                    }
                })
            })
            .collect()
    }
}

/// Runs every rule in detector order.
pub struct AnomalyEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::new(&Thresholds::default())
    }
}

impl AnomalyEngine {
    // ---
    pub fn new(thresholds: &Thresholds) -> Self {
        // ---
        let rules: Vec<Box<dyn Rule>> = vec![
            Box::new(BatteryRule {
                min_volts: thresholds.battery_min_volts,
            }),
            Box::new(StepRule {
                name: "temperature",
                channel: channels::AIR_TEMPERATURE,
                kind: AnomalyKind::Temperature,
                max_step: thresholds.temperature_step,
                unit: "°",
            }),
            Box::new(HumidityRule),
            Box::new(StepRule {
                name: "pressure",
                channel: channels::AIR_PRESSURE,
                kind: AnomalyKind::Pressure,
                max_step: thresholds.pressure_step,
                unit: " hPa",
            }),
            Box::new(GapRule {
                max_gap: thresholds.expected_interval + thresholds.interval_tolerance,
            }),
        ];

        tracing::debug!(count = rules.len(), "Initialized anomaly rules");
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate every rule. Pure: the same input always yields the same list.
    pub fn detect(&self, records: &[WeatherRecord]) -> Vec<Anomaly> {
        self.rules
            .iter()
            .flat_map(|rule| rule.detect(records))
            .collect()
    }
}

/// Number of anomalies per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnomalySummary {
    pub total: usize,
    pub info: usize,
    pub warning: usize,
    pub error: usize,
}

impl AnomalySummary {
    pub fn from_anomalies(anomalies: &[Anomaly]) -> Self {
        anomalies.iter().fold(Self::default(), |mut s, a| {
            s.total += 1;
            match a.severity {
                Severity::Info => s.info += 1,
                Severity::Warning => s.warning += 1,
                Severity::Error => s.error += 1,
            }
            s
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{FieldValue, TIMESTAMP_FIELD};
    use chrono::{DateTime, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn create_test_record(minute: i64, readings: &[(&str, f64)]) -> WeatherRecord {
        // ---
        let instant = start() + Duration::minutes(minute);
        let mut fields = vec![(
            TIMESTAMP_FIELD.to_string(),
            FieldValue::Text(instant.format("%Y-%m-%d %H:%M:%S").to_string()),
        )];
        fields.extend(
            readings
                .iter()
                .map(|(name, value)| (name.to_string(), FieldValue::Number(*value))),
        );
        WeatherRecord::new(fields, Some(instant))
    }

    fn detect(records: &[WeatherRecord]) -> Vec<Anomaly> {
        AnomalyEngine::default().detect(records)
    }

    #[test]
    fn test_humidity_out_of_range_is_error() {
        // ---
        let records = vec![
            create_test_record(0, &[(channels::RELATIVE_HUMIDITY, 150.0)]),
            create_test_record(2, &[(channels::RELATIVE_HUMIDITY, -5.0)]),
            create_test_record(4, &[(channels::RELATIVE_HUMIDITY, 55.0)]),
        ];

        let anomalies = detect(&records);
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies
            .iter()
            .all(|a| a.kind == AnomalyKind::Humidity && a.severity == Severity::Error));
        assert_eq!(anomalies[0].timestamp, "2025-05-01 12:00:00");
        assert_eq!(
            anomalies[1].message,
            "Invalid humidity reading: -5% at 2025-05-01 12:02:00"
        );
    }

    #[test]
    fn test_temperature_step() {
        // ---
        let spike = vec![
            create_test_record(0, &[(channels::AIR_TEMPERATURE, 20.0)]),
            create_test_record(2, &[(channels::AIR_TEMPERATURE, 26.0)]),
        ];
        let anomalies = detect(&spike);

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::Temperature);
        assert_eq!(anomalies[0].severity, Severity::Warning);
        assert_eq!(anomalies[0].timestamp, "2025-05-01 12:02:00");
        assert!(anomalies[0].message.contains("6.0°"));

        let gentle = vec![
            create_test_record(0, &[(channels::AIR_TEMPERATURE, 20.0)]),
            create_test_record(2, &[(channels::AIR_TEMPERATURE, 23.0)]),
        ];
        assert!(detect(&gentle).is_empty());
    }

    #[test]
    fn test_zero_is_a_reading_but_missing_is_not() {
        // ---
        let records = vec![
            create_test_record(0, &[(channels::AIR_TEMPERATURE, 0.0)]),
            create_test_record(2, &[(channels::AIR_TEMPERATURE, 7.0)]),
            create_test_record(4, &[]),
            create_test_record(6, &[(channels::AIR_TEMPERATURE, 30.0)]),
        ];

        let anomalies = detect(&records);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].timestamp, "2025-05-01 12:02:00");
    }

    #[test]
    fn test_pressure_step() {
        // ---
        let records = vec![
            create_test_record(0, &[(channels::AIR_PRESSURE, 1010.0)]),
            create_test_record(2, &[(channels::AIR_PRESSURE, 1021.5)]),
            create_test_record(4, &[(channels::AIR_PRESSURE, 1012.0)]),
        ];

        let anomalies = detect(&records);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::Pressure);
        assert_eq!(
            anomalies[0].message,
            "Unusual pressure change detected: 11.5 hPa change at 2025-05-01 12:02:00"
        );
    }

    #[test]
    fn test_battery_threshold() {
        // ---
        let records = vec![
            create_test_record(0, &[(channels::BATTERY_MIN, 12.0)]),
            create_test_record(2, &[(channels::BATTERY_MIN, 11.8)]),
        ];

        let anomalies = detect(&records);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(
            anomalies[0].message,
            "Low battery voltage detected: 11.8V at 2025-05-01 12:02:00"
        );
    }

    #[test]
    fn test_gap_reports_minutes() {
        // ---
        let records = vec![
            create_test_record(0, &[]),
            create_test_record(10, &[]),
            create_test_record(12, &[]),
        ];

        let anomalies = detect(&records);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::MissingData);
        assert_eq!(anomalies[0].severity, Severity::Info);
        assert_eq!(anomalies[0].timestamp, "2025-05-01 12:00:00");
        assert!(anomalies[0].message.contains("10 minutes"));
    }

    #[test]
    fn test_gap_tolerance_boundary() {
        // ---
        let base = create_test_record(0, &[]);
        let at_limit = WeatherRecord::new(
            vec![],
            Some(start() + Duration::seconds(150)),
        );
        let past_limit = WeatherRecord::new(
            vec![],
            Some(start() + Duration::seconds(151)),
        );

        assert!(detect(&[base.clone(), at_limit]).is_empty());
        assert_eq!(detect(&[base, past_limit]).len(), 1);
    }

    #[test]
    fn test_detector_order() {
        // ---
        let records = vec![
            create_test_record(
                0,
                &[
                    (channels::AIR_TEMPERATURE, 10.0),
                    (channels::BATTERY_MIN, 12.5),
                ],
            ),
            create_test_record(
                20,
                &[
                    (channels::AIR_TEMPERATURE, 20.0),
                    (channels::BATTERY_MIN, 11.0),
                    (channels::RELATIVE_HUMIDITY, 101.0),
                ],
            ),
        ];

        let kinds: Vec<AnomalyKind> = detect(&records).iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AnomalyKind::Battery,
                AnomalyKind::Temperature,
                AnomalyKind::Humidity,
                AnomalyKind::MissingData,
            ]
        );
        assert_eq!(
            AnomalyEngine::default().rule_names(),
            vec!["battery", "temperature", "humidity", "pressure", "missing_data"]
        );
    }

    #[test]
    fn test_empty_and_summary() {
        // ---
        assert!(detect(&[]).is_empty());

        let records = vec![
            create_test_record(0, &[(channels::RELATIVE_HUMIDITY, 120.0)]),
            create_test_record(30, &[(channels::BATTERY_MIN, 11.0)]),
        ];
        let summary = AnomalySummary::from_anomalies(&detect(&records));

        assert_eq!(
            summary,
            AnomalySummary {
                total: 3,
                info: 1,
                warning: 1,
                error: 1,
            }
        );
    }
}
