pub mod audit;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod events;
pub mod metrics;
pub mod types;

pub use audit::{AuditBackend, AuditEvent, AuditLogger, DatabaseAuditRepository};
pub use config::Config;
pub use crypto::{CredentialCipher, EncryptedPayload};
pub use database::DatabasePool;
pub use error::{Error, ErrorCode, ErrorContext, Result};
pub use events::{EventBus, RealtimeMessage, RealtimePayload};
pub use metrics::MetricsRegistry;
pub use types::*;

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
