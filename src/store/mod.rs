//! Persistence for sensors, readings and latest-value rows.
//!
//! Handlers and the stats gateway only see the [`Repository`] trait; which
//! backend sits behind it is decided once at startup from configuration.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use thiserror::Error;
use tracing::info;

use crate::{
    config::StorageConfig,
    db::{
        self,
        models::{
            LatestReading, MonthlyAggregate, NewReading, NewSensor, Reading, ReadingAggregate,
            Sensor,
        },
    },
};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

/// Upper bound on rows returned by a history query.
pub const HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Calendar components a reading's local date has to match. Unset
/// components match anything, so `month: Some(3)` alone selects every March.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalendarFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    /// Seconds east of UTC used to derive the local date.
    pub utc_offset_secs: i32,
}

impl CalendarFilter {
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        (ts + Duration::seconds(i64::from(self.utc_offset_secs))).date_naive()
    }

    pub fn matches(&self, ts: DateTime<Utc>) -> bool {
        let date = self.local_date(ts);
        self.year.map_or(true, |y| date.year() == y)
            && self.month.map_or(true, |m| date.month() == m)
            && self.day.map_or(true, |d| date.day() == d)
    }
}

/// Aggregation window: `start` inclusive, `end` exclusive, either side open,
/// optionally narrowed to calendar components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub calendar: CalendarFilter,
}

impl Span {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    pub fn within(self, calendar: CalendarFilter) -> Self {
        Self { calendar, ..self }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s)
            && self.end.map_or(true, |e| ts < e)
            && self.calendar.matches(ts)
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Create the sensor or update its name, location and active flag.
    async fn provision_sensor(&self, sensor: &NewSensor) -> Result<Sensor, StoreError>;

    async fn find_sensor(&self, code: &str) -> Result<Option<Sensor>, StoreError>;

    /// Resolve (or auto-provision) the sensor, upsert its latest-value row
    /// and append the reading. Either all of it happens or none of it does.
    async fn record(&self, reading: &NewReading) -> Result<Reading, StoreError>;

    /// One entry per sensor that has reported at least once, ordered by code.
    async fn latest_readings(&self) -> Result<Vec<LatestReading>, StoreError>;

    /// Readings of one sensor with `from <= recorded_at <= to`, newest first,
    /// at most `limit` rows.
    async fn history(
        &self,
        sensor_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Reading>, StoreError>;

    async fn aggregate(&self, span: Span) -> Result<ReadingAggregate, StoreError>;

    /// Per-month averages over `span`, oldest month first. Months are cut in
    /// the span's calendar offset; months without readings are absent.
    async fn monthly(&self, span: Span) -> Result<Vec<MonthlyAggregate>, StoreError>;
}

/// Build the backend selected by `STORAGE_BACKEND`.
pub async fn connect(storage: &StorageConfig) -> Result<Arc<dyn Repository>> {
    match storage {
        StorageConfig::Postgres {
            database_url,
            pool_max,
        } => {
            let pool = db::create_pool(database_url, *pool_max).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            Ok(Arc::new(PgRepository::new(pool)))
        }
        StorageConfig::Memory => {
            info!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn span_is_half_open() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(1);
        let span = Span::between(start, end);

        assert!(span.contains(start));
        assert!(span.contains(end - Duration::seconds(1)));
        assert!(!span.contains(end));
        assert!(!span.contains(start - Duration::seconds(1)));
    }

    #[test]
    fn open_span_contains_everything() {
        let ts = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        assert!(Span::all().contains(ts));
    }

    #[test]
    fn calendar_components_match_independently() {
        let march_14 = Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap();
        let only_march = CalendarFilter {
            month: Some(3),
            ..CalendarFilter::default()
        };
        assert!(only_march.matches(march_14));
        assert!(only_march.matches(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()));
        assert!(!only_march.matches(Utc.with_ymd_and_hms(2024, 4, 14, 12, 0, 0).unwrap()));

        let exact = CalendarFilter {
            year: Some(2024),
            month: Some(3),
            day: Some(14),
            utc_offset_secs: 0,
        };
        assert!(exact.matches(march_14));
        assert!(!exact.matches(march_14 + Duration::days(1)));
        assert!(CalendarFilter::default().matches(march_14));
    }

    #[test]
    fn calendar_uses_local_date() {
        // 03:00Z on the 15th is still the 14th at UTC-05:00.
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 3, 0, 0).unwrap();
        let filter = CalendarFilter {
            day: Some(14),
            utc_offset_secs: -5 * 3600,
            ..CalendarFilter::default()
        };
        assert!(filter.matches(ts));
        assert!(!Span::all().within(filter).contains(ts + Duration::hours(6)));
    }
}
