use super::{ErrorCode, ErrorContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Low priority errors that don't affect system functionality
    Low,
    /// Medium priority errors that may degrade performance
    Medium,
    /// High priority errors that affect core functionality
    High,
    /// Critical errors that require immediate attention
    Critical,
}

/// Main error type for the Singura platform
#[derive(Debug, ThisError, Clone)]
pub struct Error {
    /// Standardized error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional detailed description
    pub details: Option<String>,
    /// Error context for debugging
    pub context: ErrorContext,
    /// Error severity
    pub severity: ErrorSeverity,
}

impl Error {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            context: ErrorContext::new(),
            severity: Self::default_severity_for_code(code),
        }
    }

    /// Create error with details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set error context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Set error severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Record the connection the failing operation was working on
    pub fn for_connection(mut self, connection_id: uuid::Uuid) -> Self {
        self.context.connection_id = Some(connection_id.to_string());
        self
    }

    /// Add trace to context
    pub fn add_trace(mut self, trace: impl Into<String>) -> Self {
        self.context = self.context.add_trace(trace.into());
        self
    }

    /// Add metadata to context
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.add_metadata(key.into(), value);
        self
    }

    /// Get HTTP status code
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Check if should be logged as error level
    pub fn should_log_as_error(&self) -> bool {
        self.code.should_log_as_error()
            || matches!(self.severity, ErrorSeverity::High | ErrorSeverity::Critical)
    }

    /// Convert to JSON for API responses. Token material never enters error
    /// messages, so no environment-specific redaction is required here.
    pub fn to_api_response(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "error_id": self.context.error_id,
                "request_id": self.context.request_id,
                "timestamp": self.context.timestamp
            }
        })
    }

    /// Get default severity for error code
    fn default_severity_for_code(code: ErrorCode) -> ErrorSeverity {
        match code {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::SchemaValidation
            | ErrorCode::ValueOutOfRange
            | ErrorCode::ResourceNotFound
            | ErrorCode::ConnectionNotFound
            | ErrorCode::Cancelled => ErrorSeverity::Low,

            ErrorCode::ResourceAlreadyExists
            | ErrorCode::AuthenticationFailed
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid
            | ErrorCode::PlatformRateLimited
            | ErrorCode::RunAlreadyActive
            | ErrorCode::RefreshFailedTransient
            | ErrorCode::DetectorFailed => ErrorSeverity::Medium,

            ErrorCode::DatabaseConnectionError
            | ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::PlatformUnavailable
            | ErrorCode::ServiceUnavailable
            | ErrorCode::CredentialsMissing
            | ErrorCode::RefreshFailedPermanent
            | ErrorCode::RevocationFailed
            | ErrorCode::RunExecutionFailed
            | ErrorCode::QueueError => ErrorSeverity::High,

            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::DatabaseTransactionError
            | ErrorCode::MigrationMissing
            | ErrorCode::EncryptionError
            | ErrorCode::DecryptionError
            | ErrorCode::CryptoValidation => ErrorSeverity::Critical,

            _ => ErrorSeverity::Medium,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct ErrorSer {
            code: ErrorCode,
            message: String,
            details: Option<String>,
            context: ErrorContext,
            severity: ErrorSeverity,
        }

        let error_ser = ErrorSer {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            context: self.context.clone(),
            severity: self.severity,
        };

        error_ser.serialize(serializer)
    }
}

// Convenience constructors for common errors
impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, message)
    }

    pub fn connection_not_found(connection_id: uuid::Uuid) -> Self {
        Self::new(
            ErrorCode::ConnectionNotFound,
            format!("platform connection {} not found", connection_id),
        )
        .for_connection(connection_id)
    }

    pub fn credentials_missing(connection_id: uuid::Uuid) -> Self {
        Self::new(
            ErrorCode::CredentialsMissing,
            format!("no stored credentials for connection {}", connection_id),
        )
        .for_connection(connection_id)
    }

    pub fn crypto_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CryptoValidation, message)
    }

    pub fn schema_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SchemaValidation, message)
    }

    pub fn migration_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MigrationMissing, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "cancelled")
    }
}

// Implement From for common error types
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                    ErrorCode::DatabaseConstraintViolation
                } else {
                    ErrorCode::DatabaseQueryError
                }
            }
            sqlx::Error::RowNotFound => ErrorCode::ResourceNotFound,
            sqlx::Error::PoolTimedOut => ErrorCode::DatabaseConnectionError,
            sqlx::Error::Io(_) => ErrorCode::DatabaseConnectionError,
            _ => ErrorCode::DatabaseQueryError,
        };

        Self::new(code, err.to_string()).add_trace("sqlx::Error conversion")
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        let code = match err.kind() {
            redis::ErrorKind::IoError => ErrorCode::NetworkError,
            redis::ErrorKind::TypeError | redis::ErrorKind::ExecAbortError => {
                ErrorCode::SerializationError
            }
            _ => ErrorCode::CacheError,
        };

        Self::new(code, err.to_string()).add_trace("redis::RedisError conversion")
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::SerializationError, err.to_string())
            .add_trace("serde_json::Error conversion")
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::new(ErrorCode::ConfigurationError, err.to_string())
            .add_trace("config::ConfigError conversion")
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::NetworkTimeout
        } else if err.is_connect() {
            ErrorCode::PlatformUnavailable
        } else {
            ErrorCode::NetworkError
        };

        Self::new(code, err.to_string()).add_trace("reqwest::Error conversion")
    }
}
