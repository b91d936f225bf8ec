//! API error types.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// API errors. Only rate-limit conditions and malformed requests surface
/// as errors; every other pipeline outcome is a 200 with a schema-valid
/// body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request gate denied the request.
    #[error("rate limit exceeded for the {tier} window")]
    RateLimited { tier: String, retry_after: u64 },

    /// The upstream model service is rate limited.
    #[error("analysis service is rate limited")]
    UpstreamRateLimited { retry_after: Option<u64> },

    /// Bad request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, violated, retry_after) = match &self {
            ApiError::RateLimited { tier, retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                Some(tier.clone()),
                Some(*retry_after),
            ),
            ApiError::UpstreamRateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "upstream_rate_limited",
                None,
                // Default hint when the upstream did not provide one.
                Some(retry_after.unwrap_or(60)),
            ),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", None, None),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                None,
                None,
            ),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            violated,
            retry_after,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
