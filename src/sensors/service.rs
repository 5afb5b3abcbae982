use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use super::payload::{self, Submission, ValidationError};
use crate::{
    db::models::{LatestReading, NewSensor, Reading, Sensor},
    store::{Repository, StoreError, HISTORY_LIMIT},
};

#[derive(Debug, Error)]
pub enum SensorError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("unknown sensor: {0}")]
    UnknownSensor(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Ingestion and query operations over the sensor repository.
#[derive(Clone)]
pub struct SensorService {
    repo: Arc<dyn Repository>,
}

impl SensorService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Validates `submission`, then upserts the sensor's latest-value row and
    /// appends the reading in one repository call. Nothing is written when
    /// validation fails.
    pub async fn ingest(&self, submission: Submission, now: DateTime<Utc>) -> Result<Reading, SensorError> {
        let reading = submission.validate(now)?;

        match self.repo.record(&reading).await {
            Ok(row) => {
                info!(
                    sensor = %reading.sensor_code,
                    humidity_pct = row.humidity_pct,
                    tilt = row.tilt,
                    vibration = row.vibration,
                    recorded_at = %row.recorded_at,
                    "Reading ingested"
                );
                Ok(row)
            }
            Err(e) => {
                error!(sensor = %reading.sensor_code, error = %e, "Failed to persist reading");
                Err(e.into())
            }
        }
    }

    pub async fn provision(&self, sensor: NewSensor) -> Result<Sensor, SensorError> {
        let code = payload::validate_code(&sensor.code)?.to_owned();
        let sensor = NewSensor { code, ..sensor };
        let row = self.repo.provision_sensor(&sensor).await?;
        info!(sensor = %row.code, name = %row.name, active = row.is_active, "Sensor provisioned");
        Ok(row)
    }

    pub async fn latest(&self) -> Result<Vec<LatestReading>, SensorError> {
        Ok(self.repo.latest_readings().await?)
    }

    /// Up to [`HISTORY_LIMIT`] readings of `code`, newest first, bounded by
    /// the inclusive `from`/`to` when given.
    pub async fn history(
        &self,
        code: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<(Sensor, Vec<Reading>), SensorError> {
        let code = payload::validate_code(code)?;
        let sensor = self
            .repo
            .find_sensor(code)
            .await?
            .ok_or_else(|| SensorError::UnknownSensor(code.to_owned()))?;
        let rows = self.repo.history(sensor.id, from, to, HISTORY_LIMIT).await?;
        Ok((sensor, rows))
    }
}
