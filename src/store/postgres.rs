use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgArguments, Postgres},
    query::QueryAs,
    PgPool,
};

use super::{Repository, Span, StoreError};
use crate::db::models::{
    LatestReading, MonthlyAggregate, NewReading, NewSensor, Reading, ReadingAggregate, Sensor,
};

#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn provision_sensor(&self, sensor: &NewSensor) -> Result<Sensor, StoreError> {
        let row = sqlx::query_as::<_, Sensor>(
            r#"
            INSERT INTO sensors (code, name, location, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO UPDATE
                SET name      = EXCLUDED.name,
                    location  = EXCLUDED.location,
                    is_active = EXCLUDED.is_active
            RETURNING id, code, name, location, is_active
            "#,
        )
        .bind(&sensor.code)
        .bind(&sensor.name)
        .bind(&sensor.location)
        .bind(sensor.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_sensor(&self, code: &str) -> Result<Option<Sensor>, StoreError> {
        let row = sqlx::query_as::<_, Sensor>(
            "SELECT id, code, name, location, is_active FROM sensors WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record(&self, reading: &NewReading) -> Result<Reading, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The no-op update makes RETURNING yield the existing row as well.
        let sensor_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sensors (code, name)
            VALUES ($1, $1)
            ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
            RETURNING id
            "#,
        )
        .bind(&reading.sensor_code)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO latest_readings
                (sensor_id, humidity_pct, tilt, vibration, vibration_pulse, recorded_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (sensor_id) DO UPDATE
                SET humidity_pct    = EXCLUDED.humidity_pct,
                    tilt            = EXCLUDED.tilt,
                    vibration       = EXCLUDED.vibration,
                    vibration_pulse = EXCLUDED.vibration_pulse,
                    recorded_at     = EXCLUDED.recorded_at,
                    updated_at      = EXCLUDED.updated_at
            "#,
        )
        .bind(sensor_id)
        .bind(reading.humidity_pct)
        .bind(reading.tilt)
        .bind(reading.vibration)
        .bind(reading.vibration_pulse)
        .bind(reading.recorded_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, Reading>(
            r#"
            INSERT INTO sensor_readings
                (sensor_id, humidity_pct, tilt, vibration, vibration_pulse, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, sensor_id, humidity_pct, tilt, vibration, vibration_pulse, recorded_at
            "#,
        )
        .bind(sensor_id)
        .bind(reading.humidity_pct)
        .bind(reading.tilt)
        .bind(reading.vibration)
        .bind(reading.vibration_pulse)
        .bind(reading.recorded_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn latest_readings(&self) -> Result<Vec<LatestReading>, StoreError> {
        let rows = sqlx::query_as::<_, LatestReading>(
            r#"
            SELECT s.code AS sensor_code,
                   s.name AS sensor_name,
                   l.humidity_pct,
                   l.tilt,
                   l.vibration,
                   l.vibration_pulse,
                   l.recorded_at
            FROM latest_readings l
            JOIN sensors s ON s.id = l.sensor_id
            ORDER BY s.code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn history(
        &self,
        sensor_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, sensor_id, humidity_pct, tilt, vibration, vibration_pulse, recorded_at
            FROM sensor_readings
            WHERE sensor_id = $1
              AND ($2::timestamptz IS NULL OR recorded_at >= $2)
              AND ($3::timestamptz IS NULL OR recorded_at <= $3)
            ORDER BY recorded_at DESC
            LIMIT $4
            "#,
        )
        .bind(sensor_id)
        .bind(from)
        .bind(to)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn aggregate(&self, span: Span) -> Result<ReadingAggregate, StoreError> {
        let sql = format!(
            r#"
            SELECT COUNT(*)                                  AS total_readings,
                   AVG(humidity_pct)                         AS humidity_avg,
                   MAX(humidity_pct)                         AS humidity_peak,
                   MIN(humidity_pct)                         AS humidity_floor,
                   AVG(vibration_pulse)::float8              AS pulse_avg,
                   MAX(vibration_pulse)::float8              AS pulse_peak,
                   COUNT(*) FILTER (WHERE tilt)              AS tilt_events,
                   COUNT(*) FILTER (WHERE vibration)         AS vibration_events,
                   MIN(recorded_at)                          AS first_recorded_at,
                   MAX(recorded_at)                          AS last_recorded_at
            {SPAN_SOURCE}
            "#
        );
        let row = bind_span(sqlx::query_as::<_, ReadingAggregate>(&sql), &span)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn monthly(&self, span: Span) -> Result<Vec<MonthlyAggregate>, StoreError> {
        let sql = format!(
            r#"
            SELECT date_trunc('month', local_ts)::date   AS month,
                   COUNT(*)                              AS total_readings,
                   AVG(humidity_pct)                     AS humidity_avg,
                   AVG(vibration_pulse)::float8          AS pulse_avg
            {SPAN_SOURCE}
            GROUP BY 1
            ORDER BY 1
            "#
        );
        let rows = bind_span(sqlx::query_as::<_, MonthlyAggregate>(&sql), &span)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// Readings restricted to a [`Span`]. `local_ts` is the wall-clock time in
/// the span's calendar offset. Binds `$1..$6`, see [`bind_span`].
const SPAN_SOURCE: &str = r#"
            FROM (
                SELECT r.*,
                       (r.recorded_at AT TIME ZONE 'UTC') + $6::int * INTERVAL '1 second' AS local_ts
                FROM sensor_readings r
            ) s
            WHERE ($1::timestamptz IS NULL OR recorded_at >= $1)
              AND ($2::timestamptz IS NULL OR recorded_at <  $2)
              AND ($3::int IS NULL OR EXTRACT(YEAR  FROM local_ts) = $3)
              AND ($4::int IS NULL OR EXTRACT(MONTH FROM local_ts) = $4)
              AND ($5::int IS NULL OR EXTRACT(DAY   FROM local_ts) = $5)
"#;

fn bind_span<'q, O>(
    query: QueryAs<'q, Postgres, O, PgArguments>,
    span: &Span,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    let calendar = span.calendar;
    query
        .bind(span.start)
        .bind(span.end)
        .bind(calendar.year)
        .bind(calendar.month.map(|m| m as i32))
        .bind(calendar.day.map(|d| d as i32))
        .bind(calendar.utc_offset_secs)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::store::{CalendarFilter, HISTORY_LIMIT};

    fn reading(code: &str, humidity_pct: f64, minutes: i64) -> NewReading {
        NewReading {
            sensor_code: code.to_owned(),
            humidity_pct,
            tilt: minutes % 2 == 0,
            vibration: false,
            vibration_pulse: Some(50),
            recorded_at: Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a Postgres server"]
    async fn record_upserts_latest_and_appends(pool: PgPool) {
        let repo = PgRepository::new(pool);
        repo.record(&reading("SEN01", 10.0, 0)).await.unwrap();
        repo.record(&reading("SEN01", 20.0, 1)).await.unwrap();
        repo.record(&reading("SEN01", 30.0, 2)).await.unwrap();

        let latest = repo.latest_readings().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].sensor_name, "SEN01");
        assert_eq!(latest[0].humidity_pct, 30.0);

        let id = repo.find_sensor("SEN01").await.unwrap().unwrap().id;
        let history = repo.history(id, None, None, HISTORY_LIMIT).await.unwrap();
        let humidity: Vec<f64> = history.iter().map(|r| r.humidity_pct).collect();
        assert_eq!(humidity, [30.0, 20.0, 10.0]);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a Postgres server"]
    async fn aggregate_over_empty_table_is_all_none(pool: PgPool) {
        let repo = PgRepository::new(pool);
        let agg = repo.aggregate(Span::all()).await.unwrap();
        assert_eq!(agg, ReadingAggregate::default());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a Postgres server"]
    async fn aggregate_counts_events(pool: PgPool) {
        let repo = PgRepository::new(pool);
        for (minute, humidity) in [(0, 20.0), (1, 40.0), (2, 60.0)] {
            repo.record(&reading("SEN01", humidity, minute)).await.unwrap();
        }

        let agg = repo.aggregate(Span::all()).await.unwrap();
        assert_eq!(agg.total_readings, 3);
        assert_eq!(agg.humidity_avg, Some(40.0));
        assert_eq!(agg.humidity_floor, Some(20.0));
        assert_eq!(agg.tilt_events, 2);
        assert_eq!(agg.pulse_peak, Some(50.0));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a Postgres server"]
    async fn provision_updates_existing_sensor(pool: PgPool) {
        let repo = PgRepository::new(pool);
        repo.record(&reading("SEN01", 10.0, 0)).await.unwrap();
        let updated = repo
            .provision_sensor(&NewSensor {
                code: "SEN01".into(),
                name: "Culvert".into(),
                location: Some("km 4".into()),
                is_active: false,
            })
            .await
            .unwrap();

        assert_eq!(updated.name, "Culvert");
        assert!(!updated.is_active);
        assert_eq!(repo.latest_readings().await.unwrap()[0].sensor_name, "Culvert");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a Postgres server"]
    async fn calendar_filter_and_monthly_buckets(pool: PgPool) {
        let repo = PgRepository::new(pool);
        repo.record(&reading("SEN01", 20.0, 0)).await.unwrap();
        repo.record(&reading("SEN01", 40.0, 60 * 24 * 31)).await.unwrap();

        let march = Span::all().within(CalendarFilter {
            month: Some(3),
            ..CalendarFilter::default()
        });
        let agg = repo.aggregate(march).await.unwrap();
        assert_eq!(agg.total_readings, 1);
        assert_eq!(agg.humidity_avg, Some(20.0));

        let months = repo.monthly(Span::all()).await.unwrap();
        let starts: Vec<_> = months.iter().map(|m| m.month.to_string()).collect();
        assert_eq!(starts, ["2025-03-01", "2025-04-01"]);
        assert_eq!(months[0].pulse_avg, Some(50.0));
    }
}
