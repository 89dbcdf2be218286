pub mod health;
pub mod jobs;
pub mod metrics;
pub mod orgs;
pub mod proxies;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Uniform error body for API failures.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

pub fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
}
