use singura_core::Uuid;
use thiserror::Error;

/// Platform-integration specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(Uuid),

    #[error("no stored credentials for connection {0}")]
    CredentialsMissing(Uuid),

    #[error("refresh token rejected by the platform (re-authenticate): {detail}")]
    RefreshRejected { detail: String },

    #[error("transient refresh failure: {detail}")]
    RefreshTransient { detail: String },

    #[error("platform rate limited; retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("platform unavailable: {0}")]
    Unavailable(String),

    #[error("malformed platform response: {0}")]
    MalformedResponse(String),

    #[error("revocation call failed: {0}")]
    RevocationFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("core system error: {0}")]
    Core(#[from] singura_core::Error),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

impl PlatformError {
    /// Transient failures are retried with backoff; permanent ones mark the
    /// connection errored without retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::RefreshTransient { .. }
                | PlatformError::RateLimited { .. }
                | PlatformError::Unavailable(_)
                | PlatformError::Http(_)
        )
    }
}
