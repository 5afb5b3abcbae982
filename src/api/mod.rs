pub mod auth;
pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use auth::IngestAuth;
use handlers::ApiDoc;

use crate::{sensors::SensorService, stats::DailyStatsGateway, store::Repository};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub sensors: SensorService,
    pub repo: Arc<dyn Repository>,
    pub gateway: Arc<DailyStatsGateway>,
    pub auth: IngestAuth,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, gateway: DailyStatsGateway, auth: IngestAuth) -> Self {
        Self {
            sensors: SensorService::new(repo.clone()),
            repo,
            gateway: Arc::new(gateway),
            auth,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/api/ingest", post(handlers::ingest))
        .route("/api/sensors/{code}", put(handlers::provision_sensor))
        .route("/api/latest-readings", get(handlers::latest_readings))
        .route("/api/history", get(handlers::history))
        .route("/api/stats/today", get(handlers::daily_stats))
        .route("/api/dashboard/summary", get(handlers::dashboard_summary))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
