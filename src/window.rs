//! Time-window filtering, downsampling and chart series preparation.
//!
//! All functions preserve input order and never re-sort.

use chrono::{DateTime, Utc};

use crate::models::{channels, FieldValue, RangeTag, WeatherRecord};

// ---

/// Records whose derived instant is at or after `now - range.lookback()`.
///
/// Records without a derived instant are excluded.
pub fn window(
    records: &[WeatherRecord],
    range: RangeTag,
    now: DateTime<Utc>,
) -> Vec<WeatherRecord> {
    // ---
    let start = now - range.lookback();
    records
        .iter()
        .filter(|r| r.instant().is_some_and(|instant| instant >= start))
        .cloned()
        .collect()
}

/// Keep every `range.stride()`-th record, starting with the first.
pub fn downsample(records: &[WeatherRecord], range: RangeTag) -> Vec<WeatherRecord> {
    let stride = range.stride();
    records.iter().step_by(stride).cloned().collect()
}

/// Replace physically impossible humidity readings with missing.
pub fn clean_humidity(records: &[WeatherRecord]) -> Vec<WeatherRecord> {
    // ---
    records
        .iter()
        .map(|r| match r.number(channels::RELATIVE_HUMIDITY) {
            Some(h) if !(0.0..=100.0).contains(&h) => {
                let mut cleaned = r.clone();
                cleaned.set(channels::RELATIVE_HUMIDITY, FieldValue::Missing);
                cleaned
            }
            _ => r.clone(),
        })
        .collect()
}

/// Drop records without measurable rain.
pub fn drop_zero_rain(records: &[WeatherRecord]) -> Vec<WeatherRecord> {
    records
        .iter()
        .filter(|r| r.number(channels::RAIN_INTENSITY).is_some_and(|v| v > 0.0))
        .cloned()
        .collect()
}

/// Prepare the records plotted for one channel: humidity is cleaned before
/// thinning, rain intensity loses its zero points after it.
pub fn chart_series(records: &[WeatherRecord], range: RangeTag, field: &str) -> Vec<WeatherRecord> {
    // ---
    let thinned = if field == channels::RELATIVE_HUMIDITY {
        downsample(&clean_humidity(records), range)
    } else {
        downsample(records, range)
    };

    if field == channels::RAIN_INTENSITY {
        drop_zero_rain(&thinned)
    } else {
        thinned
    }
}
