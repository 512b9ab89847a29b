use super::{
    event::{AuditEvent, EventSeverity, EventType},
    traits::AuditBackend,
};
use crate::error::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// High-level audit logger that provides convenient methods for logging
/// platform events. Every event is mirrored into structured logging and
/// stored through the configured backend.
#[derive(Clone)]
pub struct AuditLogger {
    backend: Arc<dyn AuditBackend>,
}

impl AuditLogger {
    pub fn new(backend: Arc<dyn AuditBackend>) -> Self {
        Self { backend }
    }

    /// Log a generic audit event
    pub async fn log_event(&self, event: AuditEvent) -> Result<()> {
        match event.severity {
            EventSeverity::Info => {
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    organization_id = ?event.organization_id,
                    resource = ?event.resource_type,
                    description = %event.description,
                    "Audit event"
                );
            }
            EventSeverity::Warning => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    organization_id = ?event.organization_id,
                    resource = ?event.resource_type,
                    description = %event.description,
                    "Audit event (warning)"
                );
            }
            EventSeverity::Critical => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    organization_id = ?event.organization_id,
                    resource = ?event.resource_type,
                    description = %event.description,
                    metadata = ?event.metadata,
                    "Critical audit event"
                );
            }
        }

        match self.backend.store_event(&event).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // If we cannot audit, that is itself a serious problem.
                error!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to store audit event"
                );
                Err(e)
            }
        }
    }

    // Convenience methods for common platform events

    /// Log a connection status transition
    pub async fn log_connection_status_change(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        new_status: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut event = AuditEvent::builder(
            EventType::ConnectionStatusChanged,
            format!("connection {} moved to status {}", connection_id, new_status),
        )
        .organization(organization_id)
        .resource("platform_connection", connection_id.to_string())
        .metadata(
            "new_status".to_string(),
            serde_json::Value::String(new_status.to_string()),
        );

        if new_status == "error" {
            event = event.severity(EventSeverity::Warning);
        }
        if let Some(reason) = reason {
            event = event.metadata(
                "reason".to_string(),
                serde_json::Value::String(reason.to_string()),
            );
        }

        self.log_event(event.build()).await
    }

    /// Log a credential lifecycle operation. Token material is never
    /// included; only the connection id and outcome are recorded.
    pub async fn log_credential_event(
        &self,
        event_type: EventType,
        organization_id: Uuid,
        connection_id: Uuid,
        detail: &str,
    ) -> Result<()> {
        let severity = match event_type {
            EventType::CredentialsRefreshFailed => EventSeverity::Warning,
            EventType::CredentialsRevoked => EventSeverity::Warning,
            _ => EventSeverity::Info,
        };

        let event = AuditEvent::builder(
            event_type,
            format!("credential operation on connection {}: {}", connection_id, detail),
        )
        .severity(severity)
        .organization(organization_id)
        .resource("platform_connection", connection_id.to_string())
        .build();

        self.log_event(event).await
    }

    /// Log a discovery run transition
    pub async fn log_discovery_run(
        &self,
        event_type: EventType,
        organization_id: Uuid,
        run_id: Uuid,
        description: impl Into<String>,
        items_found: Option<i64>,
    ) -> Result<()> {
        let mut event = AuditEvent::builder(event_type, description)
            .organization(organization_id)
            .resource("discovery_run", run_id.to_string());

        if let Some(count) = items_found {
            event = event.metadata(
                "items_found".to_string(),
                serde_json::Value::Number(serde_json::Number::from(count)),
            );
        }

        self.log_event(event.build()).await
    }

    /// Log a risk score change on an automation
    pub async fn log_risk_change(
        &self,
        organization_id: Uuid,
        automation_id: Uuid,
        old_score: Option<u8>,
        new_score: u8,
        trigger: &str,
        user_id: Option<&str>,
    ) -> Result<()> {
        let event_type = if trigger == "manual_reassessment" {
            EventType::RiskManuallyReassessed
        } else {
            EventType::RiskScoreChanged
        };

        let mut event = AuditEvent::builder(
            event_type,
            format!(
                "risk score on automation {} changed {} -> {}",
                automation_id,
                old_score.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                new_score
            ),
        )
        .organization(organization_id)
        .resource("automation", automation_id.to_string())
        .metadata(
            "trigger".to_string(),
            serde_json::Value::String(trigger.to_string()),
        )
        .metadata(
            "new_score".to_string(),
            serde_json::Value::Number(serde_json::Number::from(new_score)),
        );

        if let Some(old) = old_score {
            event = event.metadata(
                "old_score".to_string(),
                serde_json::Value::Number(serde_json::Number::from(old)),
            );
        }
        if let Some(user) = user_id {
            event = event.user(user);
        }

        self.log_event(event.build()).await
    }
}
