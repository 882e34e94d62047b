//! Error taxonomy for the request-handling path (see spec §7).
//!
//! `ConfigError` is fatal-at-startup only and never reaches a caller;
//! `ProxyError` is the request-time taxonomy and implements
//! `IntoResponse` directly so every middleware stage can bail out with `?`.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {source}")]
    InvalidValue {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Request-time error taxonomy (spec §7). Each variant knows how to render
/// itself as the JSON body shape the original proxy used.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("not authenticated")]
    Unauthenticated { status: StatusCode, www_authenticate: Option<String> },

    #[error("forbidden")]
    Forbidden(&'static str),

    #[error("not found")]
    NotFound,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid cql2 filter")]
    InvalidFilter,
}

impl ProxyError {
    #[must_use]
    pub fn missing_auth() -> Self {
        ProxyError::Unauthenticated {
            status: StatusCode::FORBIDDEN,
            www_authenticate: None,
        }
    }

    #[must_use]
    pub fn malformed_auth() -> Self {
        ProxyError::Unauthenticated {
            status: StatusCode::UNAUTHORIZED,
            www_authenticate: Some("Bearer".to_string()),
        }
    }

    #[must_use]
    pub fn invalid_token() -> Self {
        ProxyError::Unauthenticated {
            status: StatusCode::UNAUTHORIZED,
            www_authenticate: Some("Bearer".to_string()),
        }
    }

    #[must_use]
    pub fn missing_scope(scope: &str) -> Self {
        ProxyError::Unauthenticated {
            status: StatusCode::UNAUTHORIZED,
            www_authenticate: Some(format!("Bearer scope=\"{scope}\"")),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Unauthenticated { status, www_authenticate } => {
                let detail = if status == StatusCode::FORBIDDEN {
                    "Not authenticated"
                } else {
                    "Could not validate credentials"
                };
                let mut resp = (status, axum::Json(json!({ "detail": detail }))).into_response();
                if let Some(challenge) = www_authenticate
                    && let Ok(value) = HeaderValue::from_str(&challenge)
                {
                    resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
                resp
            }
            ProxyError::Forbidden(detail) => (
                StatusCode::FORBIDDEN,
                axum::Json(json!({ "detail": detail })),
            )
                .into_response(),
            ProxyError::NotFound => (
                StatusCode::NOT_FOUND,
                axum::Json(json!({ "message": "Not found" })),
            )
                .into_response(),
            ProxyError::UpstreamUnavailable(detail) => (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({ "message": detail })),
            )
                .into_response(),
            ProxyError::InvalidFilter => (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({ "message": "Invalid CQL2 filter" })),
            )
                .into_response(),
        }
    }
}
