//! Error types for the gateway.
//!
//! Every error renders as the same JSON envelope the admission middleware
//! uses for denials:
//!
//! ```text
//! { "error": { "code": "...", "message": "...", "retry_after": 30 } }
//! ```

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ferre_concurrency::ConcurrencyError;
use ferre_ratelimit::RateLimitError;
use serde_json::json;

/// Result type alias for gateway handlers.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Service unavailable: {message}")]
    Unavailable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Busy(_) | GatewayError::Unavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Busy(_) => "busy",
            GatewayError::Unavailable { .. } => "unavailable",
            GatewayError::Internal(_) => "internal",
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::Unavailable { retry_after, .. } => *retry_after,
            GatewayError::Busy(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl From<ConcurrencyError> for GatewayError {
    fn from(error: ConcurrencyError) -> Self {
        match error {
            ConcurrencyError::PoolFull { .. } => GatewayError::Busy(error.to_string()),
            ConcurrencyError::PoolNotRunning => GatewayError::Unavailable {
                message: error.to_string(),
                retry_after: None,
            },
            ConcurrencyError::PoolAlreadyRunning => GatewayError::Internal(error.to_string()),
        }
    }
}

impl From<RateLimitError> for GatewayError {
    fn from(error: RateLimitError) -> Self {
        if error.is_config_error() {
            GatewayError::InvalidRequest(error.to_string())
        } else {
            GatewayError::Internal(error.to_string())
        }
    }
}

/// Builds the JSON error envelope. `retry_after` is whole seconds, rounded up.
pub fn error_body(code: &str, message: &str, retry_after: Option<Duration>) -> serde_json::Value {
    json!({
        "error": {
            "code": code,
            "message": message,
            "retry_after": retry_after.map(retry_after_secs),
        }
    })
}

/// Whole seconds, rounded up, at least 1.
pub fn retry_after_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }

        let retry_after = self.retry_after();
        let body = error_body(self.code(), &self.to_string(), retry_after);
        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::from_millis(3200)), 4);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_pool_errors_map_to_unavailable() {
        let busy: GatewayError = ConcurrencyError::PoolFull { capacity: 4 }.into();
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(busy.code(), "busy");

        let response = busy.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn test_config_errors_are_client_errors() {
        let err: GatewayError = RateLimitError::InvalidConfig("limit must be positive".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: GatewayError = RateLimitError::InvalidTokenCount.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_body_shape() {
        let body = error_body("rate_limited", "slow down", Some(Duration::from_millis(1500)));
        assert_eq!(body["error"]["code"], "rate_limited");
        assert_eq!(body["error"]["message"], "slow down");
        assert_eq!(body["error"]["retry_after"], 2);

        let body = error_body("blacklisted", "Access denied", None);
        assert!(body["error"]["retry_after"].is_null());
    }
}
