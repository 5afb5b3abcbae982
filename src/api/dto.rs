use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dashboard::{DashboardFilter, DashboardSummary, EventShare, Trend, TrendDirection},
    db::models::{LatestReading, MonthlyAggregate, Reading, ReadingAggregate, Sensor},
    stats::{round2, DailyStats, Provenance},
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusDto {
    pub status: String,
}

impl StatusDto {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_owned(),
        }
    }
}

/// One entry of `GET /api/latest-readings`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LatestReadingDto {
    pub sensor: String,
    pub name: String,
    pub humidity_pct: f64,
    /// 0 or 1
    pub tilt: u8,
    /// 0 or 1
    pub vibration: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

impl From<LatestReading> for LatestReadingDto {
    fn from(r: LatestReading) -> Self {
        Self {
            sensor: r.sensor_code,
            name: r.sensor_name,
            humidity_pct: r.humidity_pct,
            tilt: u8::from(r.tilt),
            vibration: u8::from(r.vibration),
            pulse: r.vibration_pulse,
            recorded_at: r.recorded_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LatestReadingsResponse {
    pub results: Vec<LatestReadingDto>,
}

/// One entry of `GET /api/history`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
    pub humidity_pct: f64,
    pub tilt: u8,
    pub vibration: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

impl From<Reading> for ReadingDto {
    fn from(r: Reading) -> Self {
        Self {
            humidity_pct: r.humidity_pct,
            tilt: u8::from(r.tilt),
            vibration: u8::from(r.vibration),
            pulse: r.vibration_pulse,
            recorded_at: r.recorded_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub sensor: String,
    pub results: Vec<ReadingDto>,
}

/// Request body for `PUT /api/sensors/{code}`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProvisionRequest {
    /// Display name; defaults to the code.
    pub name: Option<String>,
    pub location: Option<String>,
    /// Defaults to `true`.
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorDto {
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    pub is_active: bool,
}

impl From<Sensor> for SensorDto {
    fn from(s: Sensor) -> Self {
        Self {
            code: s.code,
            name: s.name,
            location: s.location,
            is_active: s.is_active,
        }
    }
}

/// Daily snapshot, floats rounded to two decimals.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DailyStatsDto {
    pub date: NaiveDate,
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

impl DailyStatsDto {
    pub fn new(date: NaiveDate, s: DailyStats) -> Self {
        Self {
            date,
            humidity_avg: round2(s.humidity_avg),
            humidity_peak: round2(s.humidity_peak),
            humidity_floor: round2(s.humidity_floor),
            pulse_avg: round2(s.pulse_avg),
            pulse_peak: round2(s.pulse_peak),
            tilt_events: s.tilt_events,
            vibration_events: s.vibration_events,
            total_readings: s.total_readings,
            source: s.source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OverallDto {
    pub total_readings: i64,
    pub humidity_avg: f64,
    pub humidity_peak: f64,
    pub humidity_floor: f64,
    pub tilt_events: i64,
    pub vibration_events: i64,
    pub first_recorded_at: Option<DateTime<Utc>>,
    pub last_recorded_at: Option<DateTime<Utc>>,
}

impl From<ReadingAggregate> for OverallDto {
    fn from(a: ReadingAggregate) -> Self {
        Self {
            total_readings: a.total_readings,
            humidity_avg: round2(a.humidity_avg.unwrap_or(0.0)),
            humidity_peak: round2(a.humidity_peak.unwrap_or(0.0)),
            humidity_floor: round2(a.humidity_floor.unwrap_or(0.0)),
            tilt_events: a.tilt_events,
            vibration_events: a.vibration_events,
            first_recorded_at: a.first_recorded_at,
            last_recorded_at: a.last_recorded_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrendDto {
    pub metric: String,
    pub recent: f64,
    pub previous: f64,
    pub change_pct: f64,
    pub direction: TrendDirection,
}

impl From<Trend> for TrendDto {
    fn from(t: Trend) -> Self {
        Self {
            metric: t.metric.to_owned(),
            recent: round2(t.recent),
            previous: round2(t.previous),
            change_pct: round2(t.change_pct),
            direction: t.direction,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventShareDto {
    pub label: String,
    pub count: i64,
    pub percent: i64,
}

impl From<EventShare> for EventShareDto {
    fn from(e: EventShare) -> Self {
        Self {
            label: e.label.to_owned(),
            count: e.count,
            percent: e.percent,
        }
    }
}

/// One point of the monthly chart series.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MonthlyPointDto {
    /// `YYYY-MM`
    pub month: String,
    pub total_readings: i64,
    pub humidity_avg: f64,
    pub pulse_avg: f64,
}

impl From<MonthlyAggregate> for MonthlyPointDto {
    fn from(m: MonthlyAggregate) -> Self {
        Self {
            month: m.month.format("%Y-%m").to_string(),
            total_readings: m.total_readings,
            humidity_avg: round2(m.humidity_avg.unwrap_or(0.0)),
            pulse_avg: round2(m.pulse_avg.unwrap_or(0.0)),
        }
    }
}

/// Calendar filters that were applied to the historical figures.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DashboardFilterDto {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub applied: bool,
}

impl From<DashboardFilter> for DashboardFilterDto {
    fn from(f: DashboardFilter) -> Self {
        Self {
            year: f.year,
            month: f.month,
            day: f.day,
            applied: !f.is_empty(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardSummaryDto {
    pub today: DailyStatsDto,
    pub filters: DashboardFilterDto,
    pub overall: OverallDto,
    pub days_tracked: i64,
    pub trends: Vec<TrendDto>,
    pub event_breakdown: Vec<EventShareDto>,
    pub monthly: Vec<MonthlyPointDto>,
}

impl From<DashboardSummary> for DashboardSummaryDto {
    fn from(s: DashboardSummary) -> Self {
        Self {
            today: DailyStatsDto::new(s.day, s.today),
            filters: s.filter.into(),
            overall: s.overall.into(),
            days_tracked: s.days_tracked,
            trends: s.trends.into_iter().map(Into::into).collect(),
            event_breakdown: s.event_breakdown.into_iter().map(Into::into).collect(),
            monthly: s.monthly.into_iter().map(Into::into).collect(),
        }
    }
}
