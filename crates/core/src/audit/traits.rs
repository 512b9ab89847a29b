use super::AuditEvent;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Trait for audit backends (database, in-memory for tests)
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Store an audit event. Called after the business transaction commits.
    async fn store_event(&self, event: &AuditEvent) -> Result<()>;

    /// Retrieve audit events with filtering
    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>>;

    /// Count audit events matching filter
    async fn count_events(&self, filter: &AuditFilter) -> Result<u64>;

    /// Clean up old events based on retention policy
    async fn cleanup_old_events(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// Filter for querying audit events
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub organization_id: Option<Uuid>,
    pub action: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort_order: SortOrder,
}

/// Sort order for audit events
#[derive(Debug, Clone, Default)]
pub enum SortOrder {
    TimestampAsc,
    #[default]
    TimestampDesc,
}
