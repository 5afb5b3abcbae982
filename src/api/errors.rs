use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::auth::AuthError;
use crate::{
    sensors::{payload::ValidationError, SensorError},
    store::StoreError,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Forbidden(#[from] AuthError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<SensorError> for ApiError {
    fn from(e: SensorError) -> Self {
        match e {
            SensorError::Invalid(e) => Self::Invalid(e),
            SensorError::UnknownSensor(_) => Self::BadRequest(e.to_string()),
            SensorError::Storage(e) => Self::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            ApiError::Storage(e) => {
                error!(error = %e, "Request failed on storage");
                "internal storage error".to_owned()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
