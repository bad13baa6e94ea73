use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::metrics::UPSTREAM_ERRORS;
use crate::models::ErrorBody;
use crate::presets::PolicyError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid rate limit policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid upstream url '{0}'")]
    InvalidUpstream(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("failed to encode metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Body(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => {
                UPSTREAM_ERRORS.inc();
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        error!("{self}");

        let message = match status {
            StatusCode::BAD_GATEWAY => "Upstream service unavailable".to_string(),
            _ => self.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
