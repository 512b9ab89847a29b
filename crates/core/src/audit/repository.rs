use super::{
    event::{AuditEvent, EventSeverity, EventType},
    traits::{AuditBackend, AuditFilter, SortOrder},
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Database-backed audit repository writing to `audit_logs`.
///
/// `timestamp` carries the event time supplied by the caller; `created_at`
/// is set by the database at insertion. The two are never conflated.
pub struct DatabaseAuditRepository {
    pool: Arc<PgPool>,
}

impl DatabaseAuditRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditBackend for DatabaseAuditRepository {
    async fn store_event(&self, event: &AuditEvent) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (id, organization_id, user_id, action, timestamp, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.organization_id.unwrap_or(Uuid::nil()))
        .bind(&event.user_id)
        .bind(event.event_type.to_string())
        .bind(event.timestamp)
        .bind(event.details_json())
        .execute(self.pool.as_ref())
        .await;

        match result {
            Ok(_) => {
                debug!(event_id = %event.id, "Stored audit event");
                Ok(())
            }
            Err(e) => {
                error!(event_id = %event.id, error = %e, "Failed to store audit event");
                Err(e.into())
            }
        }
    }

    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let order_by = match filter.sort_order {
            SortOrder::TimestampAsc => "timestamp ASC",
            SortOrder::TimestampDesc => "timestamp DESC",
        };

        let sql = format!(
            r#"
            SELECT id, organization_id, user_id, action, timestamp, details
            FROM audit_logs
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR action = $2)
              AND ($3::timestamptz IS NULL OR timestamp >= $3)
              AND ($4::timestamptz IS NULL OR timestamp <= $4)
            ORDER BY {}
            LIMIT $5 OFFSET $6
            "#,
            order_by
        );

        let rows = sqlx::query(&sql)
            .bind(filter.organization_id)
            .bind(&filter.action)
            .bind(filter.start_time)
            .bind(filter.end_time)
            .bind(filter.limit.unwrap_or(100) as i64)
            .bind(filter.offset.unwrap_or(0) as i64)
            .fetch_all(self.pool.as_ref())
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let details: serde_json::Value = row.get("details");
            let organization_id: Uuid = row.get("organization_id");
            events.push(AuditEvent {
                id: row.get("id"),
                event_type: parse_event_type(&row.get::<String, _>("action")),
                severity: details
                    .get("severity")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or(EventSeverity::Info),
                timestamp: row.get("timestamp"),
                organization_id: (!organization_id.is_nil()).then_some(organization_id),
                user_id: row.get("user_id"),
                resource_type: details
                    .get("resource_type")
                    .and_then(|v| v.as_str().map(str::to_string)),
                resource_id: details
                    .get("resource_id")
                    .and_then(|v| v.as_str().map(str::to_string)),
                description: details
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                metadata: details
                    .get("metadata")
                    .and_then(|v| serde_json::from_value::<HashMap<_, _>>(v.clone()).ok())
                    .unwrap_or_default(),
            });
        }

        Ok(events)
    }

    async fn count_events(&self, filter: &AuditFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM audit_logs
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR action = $2)
            "#,
        )
        .bind(filter.organization_id)
        .bind(&filter.action)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count as u64)
    }

    async fn cleanup_old_events(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE timestamp < $1")
            .bind(older_than)
            .execute(self.pool.as_ref())
            .await?;

        info!("Cleaned up {} old audit events", result.rows_affected());
        Ok(result.rows_affected())
    }
}

fn parse_event_type(s: &str) -> EventType {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .unwrap_or_else(|_| EventType::Custom(s.to_string()))
}
