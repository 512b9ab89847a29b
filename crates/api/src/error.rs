//! HTTP mapping for platform errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use singura_core::Error as CoreError;
use singura_discovery::DiscoveryError;
use singura_platforms::PlatformError;

/// Wrapper turning internal errors into consistent JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: serde_json::json!({"error": message.into()}),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: serde_json::json!({"error": message.into()}),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            body: serde_json::json!({"error": message.into()}),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        if err.should_log_as_error() {
            tracing::error!(error = %err, "Request failed");
        } else {
            tracing::debug!(error = %err, "Request failed");
        }

        Self {
            status: StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: err.to_api_response(),
        }
    }
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        let status = match &err {
            PlatformError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            PlatformError::CredentialsMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PlatformError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %err, "Platform request failed");
        Self {
            status,
            body: serde_json::json!({"error": err.to_string()}),
        }
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        let status = match &err {
            DiscoveryError::ConnectionNotFound(_) | DiscoveryError::RunNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DiscoveryError::RunAlreadyActive(_) | DiscoveryError::TerminalStateImmutable(_) => {
                StatusCode::CONFLICT
            }
            DiscoveryError::CredentialsMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %err, "Discovery request failed");
        Self {
            status,
            body: serde_json::json!({"error": err.to_string()}),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::from(CoreError::from(err))
    }
}
