use singura_core::Uuid;
use thiserror::Error;

/// Discovery orchestration errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(Uuid),

    #[error("missing credentials for connection {0}")]
    CredentialsMissing(Uuid),

    #[error("a discovery run is already active for connection {0}")]
    RunAlreadyActive(Uuid),

    #[error("automation not found: {0}")]
    AutomationNotFound(Uuid),

    #[error("discovery run {0} not found")]
    RunNotFound(Uuid),

    #[error("discovery run {0} is in a terminal state and cannot change")]
    TerminalStateImmutable(Uuid),

    #[error("risk history append out of order for automation {0}")]
    HistoryOrderViolation(Uuid),

    #[error("no connector registered for platform {0}")]
    NoConnector(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("platform error: {0}")]
    Platform(#[from] singura_platforms::PlatformError),

    #[error("detection error: {0}")]
    Detection(#[from] singura_detection::DetectionError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("core system error: {0}")]
    Core(#[from] singura_core::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
