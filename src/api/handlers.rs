use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::OpenApi;

use super::{
    dto::{
        DailyStatsDto, DashboardFilterDto, DashboardSummaryDto, EventShareDto, HistoryResponse,
        LatestReadingDto, LatestReadingsResponse, MonthlyPointDto, OverallDto, ProvisionRequest,
        ReadingDto, SensorDto, StatusDto, TrendDto,
    },
    errors::ApiError,
    AppState,
};
use crate::{
    dashboard::{self, DashboardFilter, TrendDirection},
    db::models::NewSensor,
    sensors::payload::{parse_timestamp, Submission},
    stats::Provenance,
};

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Bounds are kept as strings; one that does not parse is ignored.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub sensor: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Calendar narrowing for the dashboard; invalid components are ignored.
#[derive(Debug, Deserialize)]
pub struct DashboardParams {
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
}

/// Decode `body` as a JSON object into `T`.
fn json_object<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON: {e}")))?;
    if !value.is_object() {
        return Err(ApiError::BadRequest("malformed JSON: expected an object".into()));
    }
    serde_json::from_value(value).map_err(|e| ApiError::BadRequest(format!("malformed JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Accept one reading from a field device.
///
/// Requires `Authorization: Bearer <token>` or `Token <token>`. The sensor is
/// provisioned on first contact and its latest-value row is refreshed in the
/// same write as the history append.
#[utoipa::path(
    post,
    path = "/api/ingest",
    request_body = Submission,
    responses(
        (status = 200, description = "Reading stored", body = StatusDto),
        (status = 400, description = "Malformed JSON or invalid field"),
        (status = 403, description = "Missing or wrong token, or ingestion disabled"),
        (status = 500, description = "Storage failure"),
    ),
    tag = "ingest"
)]
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StatusDto>, ApiError> {
    state.auth.check(&headers)?;
    let submission: Submission = json_object(&body)?;
    state.sensors.ingest(submission, Utc::now()).await?;
    Ok(Json(StatusDto::ok()))
}

/// Create or update a sensor's metadata ahead of its first reading.
#[utoipa::path(
    put,
    path = "/api/sensors/{code}",
    params(
        ("code" = String, Path, description = "Sensor code (slug)"),
    ),
    request_body = ProvisionRequest,
    responses(
        (status = 200, description = "Sensor provisioned", body = SensorDto),
        (status = 400, description = "Invalid code or body"),
        (status = 403, description = "Missing or wrong token, or ingestion disabled"),
        (status = 500, description = "Storage failure"),
    ),
    tag = "ingest"
)]
pub async fn provision_sensor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<SensorDto>, ApiError> {
    state.auth.check(&headers)?;
    let request: ProvisionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ProvisionRequest::default()
    } else {
        json_object(&body)?
    };

    let defaults = NewSensor::auto(code.trim());
    let sensor = NewSensor {
        name: request
            .name
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or(defaults.name),
        location: request.location.or(defaults.location),
        is_active: request.is_active.unwrap_or(defaults.is_active),
        code: defaults.code,
    };
    let row = state.sensors.provision(sensor).await?;
    Ok(Json(row.into()))
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Most recent reading of every sensor that has reported at least once.
#[utoipa::path(
    get,
    path = "/api/latest-readings",
    responses(
        (status = 200, description = "Latest reading per sensor", body = LatestReadingsResponse),
        (status = 500, description = "Storage failure"),
    ),
    tag = "readings"
)]
pub async fn latest_readings(
    State(state): State<AppState>,
) -> Result<Json<LatestReadingsResponse>, ApiError> {
    let rows = state.sensors.latest().await?;
    Ok(Json(LatestReadingsResponse {
        results: rows.into_iter().map(Into::into).collect(),
    }))
}

/// Reading history of one sensor, newest first, capped at 1000 rows.
/// `from`/`to` are inclusive ISO-8601 bounds.
#[utoipa::path(
    get,
    path = "/api/history",
    params(
        ("sensor" = String, Query, description = "Sensor code"),
        ("from" = Option<String>, Query, description = "Inclusive lower bound (ISO-8601)"),
        ("to"   = Option<String>, Query, description = "Inclusive upper bound (ISO-8601)"),
    ),
    responses(
        (status = 200, description = "Readings of the sensor", body = HistoryResponse),
        (status = 400, description = "Missing or unknown sensor"),
        (status = 500, description = "Storage failure"),
    ),
    tag = "readings"
)]
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let sensor = params
        .sensor
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing required parameter: sensor".into()))?;
    let from = params.from.as_deref().and_then(parse_timestamp);
    let to = params.to.as_deref().and_then(parse_timestamp);

    let (sensor, rows) = state.sensors.history(sensor, from, to).await?;
    Ok(Json(HistoryResponse {
        sensor: sensor.code,
        results: rows.into_iter().map(Into::into).collect(),
    }))
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Today's aggregate, served from the stats cache when it is healthy and
/// computed from stored readings otherwise. `source` tells which.
#[utoipa::path(
    get,
    path = "/api/stats/today",
    responses(
        (status = 200, description = "Daily snapshot", body = DailyStatsDto),
        (status = 500, description = "Cache unusable and storage failed"),
    ),
    tag = "stats"
)]
pub async fn daily_stats(State(state): State<AppState>) -> Result<Json<DailyStatsDto>, ApiError> {
    let day = state.gateway.today();
    let stats = state.gateway.snapshot_for(day).await?;
    Ok(Json(DailyStatsDto::new(day, stats)))
}

/// Today's snapshot plus historical totals, 30-day trends, the
/// tilt/vibration split and a monthly series. `year`, `month` and `day`
/// narrow the historical figures; today's snapshot is never filtered.
#[utoipa::path(
    get,
    path = "/api/dashboard/summary",
    params(
        ("year"  = Option<i32>, Query, description = "Calendar year (2000-2100)"),
        ("month" = Option<u32>, Query, description = "Month of the year (1-12)"),
        ("day"   = Option<u32>, Query, description = "Day of the month (1-31)"),
    ),
    responses(
        (status = 200, description = "Dashboard KPIs", body = DashboardSummaryDto),
        (status = 500, description = "Storage failure"),
    ),
    tag = "stats"
)]
pub async fn dashboard_summary(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<DashboardSummaryDto>, ApiError> {
    let filter = DashboardFilter::from_query(
        params.year.as_deref(),
        params.month.as_deref(),
        params.day.as_deref(),
    );
    let summary = dashboard::build_summary(state.repo.as_ref(), &state.gateway, filter).await?;
    Ok(Json(summary.into()))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = StatusDto),
    ),
    tag = "system"
)]
pub async fn health() -> Json<StatusDto> {
    Json(StatusDto::ok())
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        ingest,
        provision_sensor,
        latest_readings,
        history,
        daily_stats,
        dashboard_summary,
        health
    ),
    components(schemas(
        Submission,
        ProvisionRequest,
        StatusDto,
        SensorDto,
        LatestReadingDto,
        LatestReadingsResponse,
        ReadingDto,
        HistoryResponse,
        DailyStatsDto,
        Provenance,
        OverallDto,
        TrendDto,
        TrendDirection,
        EventShareDto,
        MonthlyPointDto,
        DashboardFilterDto,
        DashboardSummaryDto
    )),
    tags(
        (name = "ingest",   description = "Device ingestion and provisioning"),
        (name = "readings", description = "Latest values and history"),
        (name = "stats",    description = "Daily snapshot and dashboard KPIs"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Slope Monitor API",
        version = "0.1.0",
        description = "Ingestion and query API for landslide monitoring sensors"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
