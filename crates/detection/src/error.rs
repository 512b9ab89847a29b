use thiserror::Error;

/// Detection and risk engine errors
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("detector '{detector}' failed: {detail}")]
    DetectorFailed { detector: String, detail: String },

    #[error("automation not found: {0}")]
    AutomationNotFound(uuid::Uuid),

    #[error("baseline sample too small: {sample_size} (floor is {floor})")]
    SampleTooSmall { sample_size: i32, floor: i32 },

    #[error("risk history for {automation_id} is empty")]
    EmptyHistory { automation_id: uuid::Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("core system error: {0}")]
    Core(#[from] singura_core::Error),
}

pub type Result<T> = std::result::Result<T, DetectionError>;
