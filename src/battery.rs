//! Battery health of the logger, judged from its latest reading.

use serde::Serialize;

use crate::models::{channels, WeatherRecord};

pub const CRITICAL_VOLTS: f64 = 12.0;
pub const WARNING_VOLTS: f64 = 12.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    Critical,
    Warning,
    Normal,
}

impl BatteryLevel {
    pub fn classify(volts: f64) -> Self {
        if volts < CRITICAL_VOLTS {
            BatteryLevel::Critical
        } else if volts < WARNING_VOLTS {
            BatteryLevel::Warning
        } else {
            BatteryLevel::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub volts: f64,
    pub level: BatteryLevel,
    pub timestamp: String,
}

/// Classify the most recent record that carries a battery reading.
pub fn battery_status(records: &[WeatherRecord]) -> Option<BatteryStatus> {
    records.iter().rev().find_map(|r| {
        let volts = r.number(channels::BATTERY_MIN)?;
        Some(BatteryStatus {
            volts,
            level: BatteryLevel::classify(volts),
            timestamp: r.label(),
        })
    })
}
