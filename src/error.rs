//! Handler-boundary errors and the JSON error envelope.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Method {method} not allowed. Allowed: {}", .allowed.join(", "))]
    MethodNotAllowed {
        method: Method,
        allowed: &'static [&'static str],
    },
    #[error("{0}")]
    NotFound(String),
    /// A non-2xx answer from an upstream service, relayed with its status.
    #[error("{message}")]
    UpstreamStatus { status: StatusCode, message: String },
    /// The upstream could not be reached or did not answer in time.
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UpstreamStatus { status, .. } => *status,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Config(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Translate an upstream failure into a relayed error.
    ///
    /// `resource` names the thing that was looked up ("Session", "User") and
    /// `action` the operation ("list sessions"). A JSON body carrying a
    /// `message` field wins over the generic text.
    pub fn from_upstream(status: StatusCode, body: &str, resource: &str, action: &str) -> Self {
        let message = upstream_message(body).unwrap_or_else(|| match status {
            StatusCode::NOT_FOUND => format!("{resource} not found"),
            StatusCode::UNAUTHORIZED => "Authentication required".to_string(),
            StatusCode::FORBIDDEN => "Access forbidden".to_string(),
            other => format!("Failed to {action}: upstream returned {}", other.as_u16()),
        });
        ApiError::UpstreamStatus { status, message }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error_description"))
        .or_else(|| value.get("error"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let allow = match &self {
            ApiError::MethodNotAllowed { allowed, .. } => {
                HeaderValue::from_str(&allowed.join(", ")).ok()
            }
            _ => None,
        };

        let message = match &self {
            // Config details stay in the server log.
            ApiError::Config(_) => "Server configuration error".to_string(),
            other => other.to_string(),
        };

        let mut response = (
            status,
            Json(ErrorEnvelope {
                success: false,
                message,
            }),
        )
            .into_response();
        if let Some(allow) = allow {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        response
    }
}
