//! KPI view built on top of the daily snapshot and store aggregates.

use std::{ops::RangeInclusive, str::FromStr};

use chrono::{Duration, FixedOffset, NaiveDate};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    db::models::{MonthlyAggregate, ReadingAggregate},
    stats::{day_span, DailyStats, DailyStatsGateway},
    store::{CalendarFilter, Repository, Span, StoreError},
};

/// The recent trend window starts this many days before today and runs
/// open-ended; the previous window is the same length just before it.
pub const TREND_WINDOW_DAYS: i64 = 30;

const YEARS: RangeInclusive<i32> = 2000..=2100;
const MONTHS: RangeInclusive<u32> = 1..=12;
const DAYS: RangeInclusive<u32> = 1..=31;

/// Calendar narrowing of the historical part of the dashboard. Today's
/// snapshot is never filtered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl DashboardFilter {
    /// Blank, non-numeric or out-of-range values are dropped, not rejected.
    pub fn from_query(year: Option<&str>, month: Option<&str>, day: Option<&str>) -> Self {
        Self {
            year: component(year, YEARS),
            month: component(month, MONTHS),
            day: component(day, DAYS),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.year.is_none() && self.month.is_none() && self.day.is_none()
    }

    fn calendar(&self, offset: FixedOffset) -> CalendarFilter {
        CalendarFilter {
            year: self.year,
            month: self.month,
            day: self.day,
            utc_offset_secs: offset.local_minus_utc(),
        }
    }
}

fn component<T: FromStr + PartialOrd>(raw: Option<&str>, range: RangeInclusive<T>) -> Option<T> {
    raw.and_then(|v| v.trim().parse().ok())
        .filter(|v| range.contains(v))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    pub metric: &'static str,
    pub recent: f64,
    pub previous: f64,
    pub change_pct: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventShare {
    pub label: &'static str,
    pub count: i64,
    pub percent: i64,
}

#[derive(Debug, Clone)]
pub struct DashboardSummary {
    pub day: NaiveDate,
    pub today: DailyStats,
    pub filter: DashboardFilter,
    pub overall: ReadingAggregate,
    /// Local calendar days from the first to the last reading, both included.
    pub days_tracked: i64,
    pub trends: Vec<Trend>,
    pub event_breakdown: Vec<EventShare>,
    pub monthly: Vec<MonthlyAggregate>,
}

/// Percentage change of `recent` against `previous`.
///
/// Growth from nothing counts as +100 %; nothing to nothing is flat.
pub fn trend_change(recent: f64, previous: f64) -> (f64, TrendDirection) {
    if previous == 0.0 {
        return if recent == 0.0 {
            (0.0, TrendDirection::Flat)
        } else {
            (100.0, TrendDirection::Up)
        };
    }
    let change = (recent - previous) / previous * 100.0;
    let direction = if change > 0.0 {
        TrendDirection::Up
    } else if change < 0.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    };
    (change, direction)
}

fn trend(metric: &'static str, recent: f64, previous: f64) -> Trend {
    let (change_pct, direction) = trend_change(recent, previous);
    Trend {
        metric,
        recent,
        previous,
        change_pct,
        direction,
    }
}

/// Tilt vs vibration share of all events, in whole percent.
pub fn event_breakdown(tilt_events: i64, vibration_events: i64) -> Vec<EventShare> {
    let total = tilt_events + vibration_events;
    let percent = |count: i64| {
        if total == 0 {
            0
        } else {
            (count as f64 / total as f64 * 100.0).round() as i64
        }
    };
    vec![
        EventShare {
            label: "tilt",
            count: tilt_events,
            percent: percent(tilt_events),
        },
        EventShare {
            label: "vibration",
            count: vibration_events,
            percent: percent(vibration_events),
        },
    ]
}

/// `(recent, previous)` windows relative to `day`.
fn trend_windows(day: NaiveDate, offset: FixedOffset) -> (Span, Span) {
    let day_start = |d: NaiveDate| day_span(d, offset).start;
    let recent_start = day - Duration::days(TREND_WINDOW_DAYS);
    let previous_start = recent_start - Duration::days(TREND_WINDOW_DAYS);

    (
        Span {
            start: day_start(recent_start),
            ..Span::all()
        },
        Span {
            start: day_start(previous_start),
            end: day_start(recent_start),
            ..Span::all()
        },
    )
}

fn days_tracked(overall: &ReadingAggregate, calendar: &CalendarFilter) -> i64 {
    match (overall.first_recorded_at, overall.last_recorded_at) {
        (Some(first), Some(last)) => {
            (calendar.local_date(last) - calendar.local_date(first)).num_days() + 1
        }
        _ => 0,
    }
}

pub async fn build_summary(
    repo: &dyn Repository,
    gateway: &DailyStatsGateway,
    filter: DashboardFilter,
) -> Result<DashboardSummary, StoreError> {
    let day = gateway.today();
    let today = gateway.snapshot_for(day).await?;

    let calendar = filter.calendar(gateway.offset());
    let history = Span::all().within(calendar);
    let overall = repo.aggregate(history).await?;
    let monthly = repo.monthly(history).await?;

    let (recent_span, previous_span) = trend_windows(day, gateway.offset());
    let recent = repo.aggregate(recent_span.within(calendar)).await?;
    let previous = repo.aggregate(previous_span.within(calendar)).await?;

    let trends = vec![
        trend(
            "readings",
            recent.total_readings as f64,
            previous.total_readings as f64,
        ),
        trend(
            "tilt_events",
            recent.tilt_events as f64,
            previous.tilt_events as f64,
        ),
        trend(
            "vibration_events",
            recent.vibration_events as f64,
            previous.vibration_events as f64,
        ),
        trend(
            "humidity_avg",
            recent.humidity_avg.unwrap_or(0.0),
            previous.humidity_avg.unwrap_or(0.0),
        ),
    ];

    Ok(DashboardSummary {
        day,
        today,
        filter,
        days_tracked: days_tracked(&overall, &calendar),
        event_breakdown: event_breakdown(overall.tilt_events, overall.vibration_events),
        overall,
        trends,
        monthly,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{db::models::NewReading, store::MemoryRepository};

    async fn record(repo: &MemoryRepository, recorded_at: DateTime<Utc>, tilt: bool, vibration: bool) {
        repo.record(&NewReading {
            sensor_code: "SEN01".into(),
            humidity_pct: 50.0,
            tilt,
            vibration,
            vibration_pulse: None,
            recorded_at,
        })
        .await
        .unwrap();
    }

    fn utc_gateway(repo: Arc<dyn Repository>) -> DailyStatsGateway {
        DailyStatsGateway::new(
            repo,
            None,
            FixedOffset::east_opt(0).unwrap(),
            std::time::Duration::from_secs(60),
        )
    }

    #[test]
    fn trend_from_zero() {
        assert_eq!(trend_change(0.0, 0.0), (0.0, TrendDirection::Flat));
        assert_eq!(trend_change(7.0, 0.0), (100.0, TrendDirection::Up));
    }

    #[test]
    fn trend_sign_sets_direction() {
        assert_eq!(trend_change(15.0, 10.0), (50.0, TrendDirection::Up));
        assert_eq!(trend_change(5.0, 10.0), (-50.0, TrendDirection::Down));
        assert_eq!(trend_change(10.0, 10.0), (0.0, TrendDirection::Flat));
    }

    #[test]
    fn breakdown_percentages() {
        let shares = event_breakdown(1, 2);
        assert_eq!(shares[0].percent, 33);
        assert_eq!(shares[1].percent, 67);

        let empty = event_breakdown(0, 0);
        assert!(empty.iter().all(|s| s.percent == 0 && s.count == 0));
    }

    #[test]
    fn query_filter_drops_bad_components() {
        let filter = DashboardFilter::from_query(Some("2024"), Some("13"), Some("x"));
        assert_eq!(
            filter,
            DashboardFilter {
                year: Some(2024),
                month: None,
                day: None,
            }
        );
        assert!(DashboardFilter::from_query(Some(""), Some("0"), Some("32")).is_empty());
        assert!(DashboardFilter::from_query(Some("1999"), None, None).is_empty());
        assert_eq!(DashboardFilter::from_query(None, Some(" 3 "), None).month, Some(3));
    }

    #[tokio::test]
    async fn summary_splits_recent_and_previous_windows() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        record(&repo, now, true, false).await;
        record(&repo, now - Duration::days(40), false, true).await;
        record(&repo, now - Duration::days(45), true, true).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);
        let gateway = utc_gateway(repo.clone());

        let summary = build_summary(repo.as_ref(), &gateway, DashboardFilter::default())
            .await
            .unwrap();
        assert_eq!(summary.today.total_readings, 1);
        assert_eq!(summary.overall.total_readings, 3);

        let readings = summary.trends.iter().find(|t| t.metric == "readings").unwrap();
        assert_eq!((readings.recent, readings.previous), (1.0, 2.0));
        assert_eq!(readings.direction, TrendDirection::Down);

        let humidity = summary.trends.iter().find(|t| t.metric == "humidity_avg").unwrap();
        assert_eq!(humidity.direction, TrendDirection::Flat);

        assert_eq!(summary.event_breakdown[0].count, 2);
        assert_eq!(summary.event_breakdown[1].count, 2);
    }

    #[tokio::test]
    async fn recent_window_reaches_back_thirty_days() {
        let repo = MemoryRepository::new();
        let today = Utc::now().date_naive();
        let boundary = day_span(today - Duration::days(TREND_WINDOW_DAYS), FixedOffset::east_opt(0).unwrap())
            .start
            .unwrap();
        record(&repo, boundary, false, false).await;
        record(&repo, boundary - Duration::seconds(1), false, false).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);
        let gateway = utc_gateway(repo.clone());

        let summary = build_summary(repo.as_ref(), &gateway, DashboardFilter::default())
            .await
            .unwrap();
        let readings = summary.trends.iter().find(|t| t.metric == "readings").unwrap();
        assert_eq!((readings.recent, readings.previous), (1.0, 1.0));
    }

    #[tokio::test]
    async fn filter_narrows_history_but_not_today() {
        let repo = MemoryRepository::new();
        record(&repo, Utc.with_ymd_and_hms(2023, 5, 2, 10, 0, 0).unwrap(), true, false).await;
        record(&repo, Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap(), true, false).await;
        record(&repo, Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap(), false, true).await;
        record(&repo, Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap(), false, true).await;
        record(&repo, Utc::now(), false, false).await;
        let repo: Arc<dyn Repository> = Arc::new(repo);
        let gateway = utc_gateway(repo.clone());

        let filter = DashboardFilter {
            year: Some(2024),
            month: Some(5),
            day: None,
        };
        let summary = build_summary(repo.as_ref(), &gateway, filter).await.unwrap();
        assert_eq!(summary.filter, filter);
        assert_eq!(summary.today.total_readings, 1);
        assert_eq!(summary.overall.total_readings, 2);
        assert_eq!(summary.days_tracked, 19);
        assert_eq!(summary.event_breakdown[0].count, 1);
        assert_eq!(summary.event_breakdown[1].count, 1);
        assert_eq!(summary.monthly.len(), 1);
        assert_eq!(summary.monthly[0].month, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

        let unfiltered = build_summary(repo.as_ref(), &gateway, DashboardFilter::default())
            .await
            .unwrap();
        assert_eq!(unfiltered.overall.total_readings, 5);
        assert!(unfiltered.monthly.len() >= 4);
    }

    #[tokio::test]
    async fn empty_store_tracks_zero_days() {
        let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let gateway = utc_gateway(repo.clone());

        let summary = build_summary(repo.as_ref(), &gateway, DashboardFilter::default())
            .await
            .unwrap();
        assert_eq!(summary.days_tracked, 0);
        assert!(summary.monthly.is_empty());
    }
}
