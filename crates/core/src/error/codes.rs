use serde::{Deserialize, Serialize};
use std::fmt;

/// Standardized error codes for the Singura platform.
/// These are business-agnostic and represent technical error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // General System Errors (1000-1999)
    InternalServerError = 1000,
    ConfigurationError = 1001,
    ServiceUnavailable = 1002,
    Timeout = 1003,
    Cancelled = 1004,

    // Database Errors (2000-2999)
    DatabaseConnectionError = 2000,
    DatabaseConstraintViolation = 2001,
    DatabaseTransactionError = 2002,
    DatabaseQueryError = 2003,
    MigrationMissing = 2004,

    // Network & Communication Errors (3000-3999)
    NetworkError = 3000,
    NetworkTimeout = 3001,
    PlatformUnavailable = 3002,
    PlatformRateLimited = 3003,
    SerializationError = 3004,

    // Credential & OAuth Errors (4000-4999)
    AuthenticationRequired = 4000,
    AuthenticationFailed = 4001,
    TokenExpired = 4002,
    TokenInvalid = 4003,
    CredentialsMissing = 4004,
    RefreshFailedPermanent = 4005,
    RefreshFailedTransient = 4006,
    RevocationFailed = 4007,

    // Input Validation Errors (5000-5999)
    ValidationFailed = 5000,
    InvalidInput = 5001,
    MissingRequiredField = 5002,
    SchemaValidation = 5003,
    ValueOutOfRange = 5004,

    // Resource Management Errors (6000-6999)
    ResourceNotFound = 6000,
    ResourceAlreadyExists = 6001,
    ConnectionNotFound = 6002,
    OrganizationMissing = 6003,
    RunAlreadyActive = 6004,
    TerminalStateImmutable = 6005,

    // Crypto & Storage Errors (8000-8999)
    CacheError = 8000,
    StorageError = 8001,
    EncryptionError = 8002,
    DecryptionError = 8003,
    CryptoValidation = 8004,

    // Queue & Worker Errors (9000-9999)
    QueueError = 9000,
    RunExecutionFailed = 9001,
    DetectorFailed = 9002,
}

impl ErrorCode {
    /// Get HTTP status code for this error
    pub fn http_status(&self) -> u16 {
        match self {
            // 500 - Internal Server Error
            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::DatabaseConnectionError
            | ErrorCode::DatabaseTransactionError
            | ErrorCode::DatabaseQueryError
            | ErrorCode::MigrationMissing
            | ErrorCode::NetworkError
            | ErrorCode::SerializationError
            | ErrorCode::CacheError
            | ErrorCode::StorageError
            | ErrorCode::EncryptionError
            | ErrorCode::DecryptionError
            | ErrorCode::CryptoValidation
            | ErrorCode::QueueError
            | ErrorCode::RunExecutionFailed
            | ErrorCode::DetectorFailed
            | ErrorCode::RevocationFailed => 500,

            // 503 - Service Unavailable
            ErrorCode::ServiceUnavailable | ErrorCode::PlatformUnavailable => 503,

            // 408 - Request Timeout
            ErrorCode::Timeout | ErrorCode::NetworkTimeout => 408,

            // Cancellation surfaces as a client-visible 400 on the HTTP boundary
            ErrorCode::Cancelled => 400,

            // 401 - Unauthorized
            ErrorCode::AuthenticationRequired
            | ErrorCode::AuthenticationFailed
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid => 401,

            // 422 - credentials exist but cannot be made valid
            ErrorCode::CredentialsMissing
            | ErrorCode::RefreshFailedPermanent
            | ErrorCode::RefreshFailedTransient => 422,

            // 400 - Bad Request
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::SchemaValidation
            | ErrorCode::ValueOutOfRange => 400,

            // 404 - Not Found
            ErrorCode::ResourceNotFound
            | ErrorCode::ConnectionNotFound
            | ErrorCode::OrganizationMissing => 404,

            // 409 - Conflict
            ErrorCode::ResourceAlreadyExists
            | ErrorCode::DatabaseConstraintViolation
            | ErrorCode::RunAlreadyActive
            | ErrorCode::TerminalStateImmutable => 409,

            // 429 - Too Many Requests
            ErrorCode::PlatformRateLimited => 429,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::ServiceUnavailable
            | ErrorCode::Timeout
            | ErrorCode::Cancelled => "system",

            ErrorCode::DatabaseConnectionError
            | ErrorCode::DatabaseConstraintViolation
            | ErrorCode::DatabaseTransactionError
            | ErrorCode::DatabaseQueryError
            | ErrorCode::MigrationMissing => "database",

            ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::PlatformUnavailable
            | ErrorCode::PlatformRateLimited
            | ErrorCode::SerializationError => "network",

            ErrorCode::AuthenticationRequired
            | ErrorCode::AuthenticationFailed
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid
            | ErrorCode::CredentialsMissing
            | ErrorCode::RefreshFailedPermanent
            | ErrorCode::RefreshFailedTransient
            | ErrorCode::RevocationFailed => "credentials",

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::SchemaValidation
            | ErrorCode::ValueOutOfRange => "validation",

            ErrorCode::ResourceNotFound
            | ErrorCode::ResourceAlreadyExists
            | ErrorCode::ConnectionNotFound
            | ErrorCode::OrganizationMissing
            | ErrorCode::RunAlreadyActive
            | ErrorCode::TerminalStateImmutable => "resource",

            ErrorCode::CacheError
            | ErrorCode::StorageError
            | ErrorCode::EncryptionError
            | ErrorCode::DecryptionError
            | ErrorCode::CryptoValidation => "storage",

            ErrorCode::QueueError | ErrorCode::RunExecutionFailed | ErrorCode::DetectorFailed => {
                "workers"
            }
        }
    }

    /// Check if error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkTimeout
                | ErrorCode::NetworkError
                | ErrorCode::PlatformUnavailable
                | ErrorCode::PlatformRateLimited
                | ErrorCode::ServiceUnavailable
                | ErrorCode::DatabaseConnectionError
                | ErrorCode::CacheError
                | ErrorCode::RefreshFailedTransient
        )
    }

    /// Check if error should be logged at error level
    pub fn should_log_as_error(&self) -> bool {
        !matches!(
            self,
            ErrorCode::ValidationFailed
                | ErrorCode::InvalidInput
                | ErrorCode::MissingRequiredField
                | ErrorCode::SchemaValidation
                | ErrorCode::ValueOutOfRange
                | ErrorCode::ResourceNotFound
                | ErrorCode::ConnectionNotFound
                | ErrorCode::AuthenticationFailed
                | ErrorCode::TokenExpired
                | ErrorCode::PlatformRateLimited
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
