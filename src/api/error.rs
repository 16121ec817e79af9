use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::models::ErrorResponse;
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    NotReady(String),
    #[error("{0}")]
    ArtifactUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::InvalidLocator(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidTransition(_) => StatusCode::CONFLICT,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::ArtifactUnavailable(_) => StatusCode::GONE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::InvalidLocator(_) => "INVALID_LOCATOR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidTransition(_) => "INVALID_TRANSITION",
            ApiError::NotReady(_) => "NOT_READY",
            ApiError::ArtifactUnavailable(_) => "ARTIFACT_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidLocator(err) => ApiError::InvalidLocator(err.to_string()),
            ServiceError::NotFound(job_id) => ApiError::NotFound(format!("job {job_id}")),
            ServiceError::Transition(err) => ApiError::InvalidTransition(err.to_string()),
            err @ ServiceError::NotReady { .. } => ApiError::NotReady(err.to_string()),
            err @ ServiceError::ArtifactUnavailable(_) => {
                ApiError::ArtifactUnavailable(err.to_string())
            }
            err @ ServiceError::InvalidCleanup(_) => ApiError::InvalidPayload(err.to_string()),
            err => {
                error!(error = %err, "Request failed");
                ApiError::Internal(err.to_string())
            }
        }
    }
}
