use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Repository, Span, StoreError};
use crate::db::models::{
    LatestReading, MonthlyAggregate, NewReading, NewSensor, Reading, ReadingAggregate, Sensor,
};

/// In-process backend. Keeps every sensor, reading and latest-value row in
/// memory; used for local runs and for the HTTP tests.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// The lock is only ever held for synchronous bookkeeping, never across an
/// `.await`, so writers for different sensors do not wait on each other's I/O.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    /// Keyed by sensor code.
    sensors: HashMap<String, Sensor>,
    next_sensor_id: i64,
    readings: Vec<Reading>,
    /// Keyed by sensor id.
    latest: HashMap<i64, Reading>,
}

impl State {
    fn upsert_sensor(&mut self, sensor: &NewSensor) -> Sensor {
        if let Some(existing) = self.sensors.get_mut(&sensor.code) {
            existing.name = sensor.name.clone();
            existing.location = sensor.location.clone();
            existing.is_active = sensor.is_active;
            return existing.clone();
        }
        self.insert_sensor(sensor)
    }

    fn resolve_sensor(&mut self, code: &str) -> Sensor {
        match self.sensors.get(code) {
            Some(sensor) => sensor.clone(),
            None => self.insert_sensor(&NewSensor::auto(code)),
        }
    }

    fn insert_sensor(&mut self, sensor: &NewSensor) -> Sensor {
        self.next_sensor_id += 1;
        let created = Sensor {
            id: self.next_sensor_id,
            code: sensor.code.clone(),
            name: sensor.name.clone(),
            location: sensor.location.clone(),
            is_active: sensor.is_active,
        };
        self.sensors.insert(created.code.clone(), created.clone());
        created
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn provision_sensor(&self, sensor: &NewSensor) -> Result<Sensor, StoreError> {
        Ok(self.inner.write().await.upsert_sensor(sensor))
    }

    async fn find_sensor(&self, code: &str) -> Result<Option<Sensor>, StoreError> {
        Ok(self.inner.read().await.sensors.get(code).cloned())
    }

    async fn record(&self, reading: &NewReading) -> Result<Reading, StoreError> {
        let mut state = self.inner.write().await;
        let sensor = state.resolve_sensor(&reading.sensor_code);
        let row = Reading {
            id: Uuid::new_v4(),
            sensor_id: sensor.id,
            humidity_pct: reading.humidity_pct,
            tilt: reading.tilt,
            vibration: reading.vibration,
            vibration_pulse: reading.vibration_pulse,
            recorded_at: reading.recorded_at,
        };
        state.latest.insert(sensor.id, row.clone());
        state.readings.push(row.clone());
        Ok(row)
    }

    async fn latest_readings(&self) -> Result<Vec<LatestReading>, StoreError> {
        let state = self.inner.read().await;
        let mut rows: Vec<LatestReading> = state
            .sensors
            .values()
            .filter_map(|sensor| {
                state.latest.get(&sensor.id).map(|r| LatestReading {
                    sensor_code: sensor.code.clone(),
                    sensor_name: sensor.name.clone(),
                    humidity_pct: r.humidity_pct,
                    tilt: r.tilt,
                    vibration: r.vibration,
                    vibration_pulse: r.vibration_pulse,
                    recorded_at: r.recorded_at,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.sensor_code.cmp(&b.sensor_code));
        Ok(rows)
    }

    async fn history(
        &self,
        sensor_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Reading>, StoreError> {
        let state = self.inner.read().await;
        let mut rows: Vec<Reading> = state
            .readings
            .iter()
            .filter(|r| r.sensor_id == sensor_id)
            .filter(|r| from.map_or(true, |f| r.recorded_at >= f))
            .filter(|r| to.map_or(true, |t| r.recorded_at <= t))
            .cloned()
            .collect();
        // Equal timestamps: most recently written first.
        rows.reverse();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn aggregate(&self, span: Span) -> Result<ReadingAggregate, StoreError> {
        let state = self.inner.read().await;
        Ok(aggregate_readings(
            state.readings.iter().filter(|r| span.contains(r.recorded_at)),
        ))
    }

    async fn monthly(&self, span: Span) -> Result<Vec<MonthlyAggregate>, StoreError> {
        #[derive(Default)]
        struct Bucket {
            count: i64,
            humidity_sum: f64,
            pulse_sum: f64,
            pulse_count: u32,
        }

        let state = self.inner.read().await;
        let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
        for r in state.readings.iter().filter(|r| span.contains(r.recorded_at)) {
            let local = span.calendar.local_date(r.recorded_at);
            let Some(month) = local.with_day(1) else {
                continue;
            };
            let bucket = buckets.entry(month).or_default();
            bucket.count += 1;
            bucket.humidity_sum += r.humidity_pct;
            if let Some(pulse) = r.vibration_pulse {
                bucket.pulse_sum += f64::from(pulse);
                bucket.pulse_count += 1;
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(month, b)| MonthlyAggregate {
                month,
                total_readings: b.count,
                humidity_avg: Some(b.humidity_sum / b.count as f64),
                pulse_avg: (b.pulse_count > 0).then(|| b.pulse_sum / f64::from(b.pulse_count)),
            })
            .collect())
    }
}

fn aggregate_readings<'a>(readings: impl Iterator<Item = &'a Reading>) -> ReadingAggregate {
    let mut agg = ReadingAggregate::default();
    let mut humidity_sum = 0.0;
    let mut pulse_sum = 0.0;
    let mut pulse_count = 0u32;

    for r in readings {
        agg.total_readings += 1;
        humidity_sum += r.humidity_pct;
        agg.humidity_peak = Some(agg.humidity_peak.map_or(r.humidity_pct, |p| p.max(r.humidity_pct)));
        agg.humidity_floor = Some(agg.humidity_floor.map_or(r.humidity_pct, |f| f.min(r.humidity_pct)));

        if let Some(pulse) = r.vibration_pulse.map(f64::from) {
            pulse_sum += pulse;
            pulse_count += 1;
            agg.pulse_peak = Some(agg.pulse_peak.map_or(pulse, |p| p.max(pulse)));
        }

        agg.tilt_events += i64::from(r.tilt);
        agg.vibration_events += i64::from(r.vibration);
        agg.first_recorded_at = Some(agg.first_recorded_at.map_or(r.recorded_at, |t| t.min(r.recorded_at)));
        agg.last_recorded_at = Some(agg.last_recorded_at.map_or(r.recorded_at, |t| t.max(r.recorded_at)));
    }

    if agg.total_readings > 0 {
        agg.humidity_avg = Some(humidity_sum / agg.total_readings as f64);
    }
    if pulse_count > 0 {
        agg.pulse_avg = Some(pulse_sum / f64::from(pulse_count));
    }
    agg
}
