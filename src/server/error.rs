// =============================================================================
// API Errors — wire-level error taxonomy
// =============================================================================
//
// Every error body is `{success:false, error:<CODE>, message?}`. Internal
// errors log their detail and expose it only outside production.
// =============================================================================

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Typed request failure, rendered as the service's JSON error shape.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("internal error")]
    Internal { detail: String, production: bool },
}

impl ApiError {
    /// Wrap an internal failure, logging the detail unconditionally.
    pub fn internal(detail: impl Into<String>, production: bool) -> Self {
        let detail = detail.into();
        error!(detail = %detail, "internal service error");
        Self::Internal { detail, production }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Internal { detail, production } => {
                if *production {
                    "internal error".to_string()
                } else {
                    detail.clone()
                }
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.code(),
            "message": self.message(),
        });
        if let Self::RateLimited { retry_after_secs } = &self {
            body["retryAfter"] = json!(retry_after_secs);
        }

        let mut response = (self.status(), Json(body)).into_response();
        if let Self::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
