//! Daily statistics snapshots and the read-through gateway that serves them.

pub mod cache;
pub mod gateway;

use std::collections::HashMap;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use cache::{CacheLookup, RedisStatsCache, StatsCache};
pub use gateway::DailyStatsGateway;

use crate::{db::models::ReadingAggregate, store::Span};

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Cache,
    Computed,
}

/// Aggregated readings for one calendar day. Values keep full precision;
/// rounding happens when they are presented.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyStats {
    pub humidity_avg: f64,
    pub humidity_peak: f64,
    pub humidity_floor: f64,
    pub pulse_avg: f64,
    pub pulse_peak: f64,
    pub tilt_events: i64,
    pub vibration_events: i64,
    pub total_readings: i64,
    pub source: Provenance,
}

const FLOAT_FIELDS: [&str; 5] = [
    "humidity_avg",
    "humidity_peak",
    "humidity_floor",
    "pulse_avg",
    "pulse_peak",
];
const COUNT_FIELDS: [&str; 3] = ["tilt_events", "vibration_events", "total_readings"];

impl DailyStats {
    /// Absent aggregates (empty day) become zero.
    pub fn from_aggregate(agg: &ReadingAggregate) -> Self {
        Self {
            humidity_avg: agg.humidity_avg.unwrap_or(0.0),
            humidity_peak: agg.humidity_peak.unwrap_or(0.0),
            humidity_floor: agg.humidity_floor.unwrap_or(0.0),
            pulse_avg: agg.pulse_avg.unwrap_or(0.0),
            pulse_peak: agg.pulse_peak.unwrap_or(0.0),
            tilt_events: agg.tilt_events,
            vibration_events: agg.vibration_events,
            total_readings: agg.total_readings,
            source: Provenance::Computed,
        }
    }

    /// Flat field/value pairs as stored in the cache hash.
    pub fn to_cache_fields(&self) -> Vec<(&'static str, String)> {
        let floats = [
            self.humidity_avg,
            self.humidity_peak,
            self.humidity_floor,
            self.pulse_avg,
            self.pulse_peak,
        ];
        let counts = [self.tilt_events, self.vibration_events, self.total_readings];

        FLOAT_FIELDS
            .iter()
            .zip(floats)
            .map(|(k, v)| (*k, v.to_string()))
            .chain(COUNT_FIELDS.iter().zip(counts).map(|(k, v)| (*k, v.to_string())))
            .collect()
    }

    /// Rebuild a snapshot from a cache hash. Any missing or non-numeric
    /// field rejects the whole payload; extra fields are ignored.
    pub fn from_cache_fields(fields: &HashMap<String, String>) -> Result<Self, String> {
        let float = |key: &str| -> Result<f64, String> {
            let raw = fields.get(key).ok_or_else(|| format!("missing field {key}"))?;
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("field {key} is not a number: {raw:?}"))
        };
        let count = |key: &str| -> Result<i64, String> {
            let value = float(key)?;
            if value < 0.0 || value.fract() != 0.0 || value > i64::MAX as f64 {
                return Err(format!("field {key} is not a count: {value}"));
            }
            Ok(value as i64)
        };

        Ok(Self {
            humidity_avg: float("humidity_avg")?,
            humidity_peak: float("humidity_peak")?,
            humidity_floor: float("humidity_floor")?,
            pulse_avg: float("pulse_avg")?,
            pulse_peak: float("pulse_peak")?,
            tilt_events: count("tilt_events")?,
            vibration_events: count("vibration_events")?,
            total_readings: count("total_readings")?,
            source: Provenance::Cache,
        })
    }
}

/// `[day 00:00, next day 00:00)` in `offset`, as a UTC span.
pub fn day_span(day: NaiveDate, offset: FixedOffset) -> Span {
    let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
    let start = (day.and_time(NaiveTime::MIN) - shift).and_utc();
    Span::between(start, start + Duration::days(1))
}

/// Round for presentation only.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn sample() -> DailyStats {
        DailyStats {
            humidity_avg: 41.333333,
            humidity_peak: 70.5,
            humidity_floor: 12.0,
            pulse_avg: 245.5,
            pulse_peak: 900.0,
            tilt_events: 3,
            vibration_events: 7,
            total_readings: 12,
            source: Provenance::Computed,
        }
    }

    fn fields(stats: &DailyStats) -> HashMap<String, String> {
        stats
            .to_cache_fields()
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect()
    }

    #[test]
    fn empty_aggregate_is_all_zero() {
        let stats = DailyStats::from_aggregate(&ReadingAggregate::default());
        assert_eq!(stats.humidity_avg, 0.0);
        assert_eq!(stats.humidity_peak, 0.0);
        assert_eq!(stats.humidity_floor, 0.0);
        assert_eq!(stats.pulse_avg, 0.0);
        assert_eq!(stats.pulse_peak, 0.0);
        assert_eq!(stats.tilt_events, 0);
        assert_eq!(stats.vibration_events, 0);
        assert_eq!(stats.total_readings, 0);
        assert_eq!(stats.source, Provenance::Computed);
    }

    #[test]
    fn cache_fields_rebuild_with_cache_provenance() {
        let stats = sample();
        let rebuilt = DailyStats::from_cache_fields(&fields(&stats)).unwrap();
        assert_eq!(rebuilt, DailyStats { source: Provenance::Cache, ..stats });
    }

    #[test]
    fn counts_written_as_integers() {
        let stored = fields(&sample());
        assert_eq!(stored["tilt_events"], "3");
        assert_eq!(stored["humidity_peak"], "70.5");
    }

    #[test]
    fn counts_accept_float_spelling() {
        let mut stored = fields(&sample());
        stored.insert("total_readings".into(), "12.0".into());
        assert_eq!(DailyStats::from_cache_fields(&stored).unwrap().total_readings, 12);
    }

    #[test]
    fn malformed_cache_payloads_are_rejected() {
        let mut missing = fields(&sample());
        missing.remove("pulse_peak");
        assert!(DailyStats::from_cache_fields(&missing).unwrap_err().contains("pulse_peak"));

        let mut garbage = fields(&sample());
        garbage.insert("humidity_avg".into(), "n/a".into());
        assert!(DailyStats::from_cache_fields(&garbage).is_err());

        let mut fractional = fields(&sample());
        fractional.insert("tilt_events".into(), "2.5".into());
        assert!(DailyStats::from_cache_fields(&fractional).is_err());

        let mut infinite = fields(&sample());
        infinite.insert("pulse_avg".into(), "inf".into());
        assert!(DailyStats::from_cache_fields(&infinite).is_err());
    }

    #[test]
    fn day_span_honours_offset() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let lima: FixedOffset = "-05:00".parse().unwrap();
        let span = day_span(day, lima);

        assert_eq!(span.start, Some(Utc.with_ymd_and_hms(2025, 3, 14, 5, 0, 0).unwrap()));
        assert_eq!(span.end, Some(Utc.with_ymd_and_hms(2025, 3, 15, 5, 0, 0).unwrap()));
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(41.333333), 41.33);
        assert_eq!(round2(2.675000001), 2.68);
        assert_eq!(round2(0.0), 0.0);
    }
}
