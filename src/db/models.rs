use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Sensor {
    pub id: i64,
    /// Stable slug the field devices report with.
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    pub is_active: bool,
}

/// Provisioning input. Upserts name, location and active flag by `code`.
#[derive(Debug, Clone)]
pub struct NewSensor {
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    pub is_active: bool,
}

impl NewSensor {
    /// Defaults used when a reading arrives for a code nobody provisioned.
    pub fn auto(code: &str) -> Self {
        Self {
            code: code.to_owned(),
            name: code.to_owned(),
            location: None,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Reading {
    pub id: Uuid,
    pub sensor_id: i64,
    /// Relative soil humidity, 0–100.
    pub humidity_pct: f64,
    pub tilt: bool,
    pub vibration: bool,
    /// Raw pulse count from the vibration sensor, when the device reports it.
    pub vibration_pulse: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

/// A validated submission, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub sensor_code: String,
    pub humidity_pct: f64,
    pub tilt: bool,
    pub vibration: bool,
    pub vibration_pulse: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

/// A sensor's latest-value row joined with its identity.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct LatestReading {
    pub sensor_code: String,
    pub sensor_name: String,
    pub humidity_pct: f64,
    pub tilt: bool,
    pub vibration: bool,
    pub vibration_pulse: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregates over a set of readings. Every statistic is `None` when the
/// set is empty; callers decide how absence is presented.
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct ReadingAggregate {
    pub total_readings: i64,
    pub humidity_avg: Option<f64>,
    pub humidity_peak: Option<f64>,
    pub humidity_floor: Option<f64>,
    pub pulse_avg: Option<f64>,
    pub pulse_peak: Option<f64>,
    pub tilt_events: i64,
    pub vibration_events: i64,
    pub first_recorded_at: Option<DateTime<Utc>>,
    pub last_recorded_at: Option<DateTime<Utc>>,
}

/// Averages for one calendar month. `month` is the first day of the month.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MonthlyAggregate {
    pub month: NaiveDate,
    pub total_readings: i64,
    pub humidity_avg: Option<f64>,
    pub pulse_avg: Option<f64>,
}
