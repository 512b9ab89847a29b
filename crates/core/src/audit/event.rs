use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity levels for audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Info => write!(f, "info"),
            EventSeverity::Warning => write!(f, "warning"),
            EventSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Audited actions across the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Connection lifecycle
    ConnectionCreated,
    ConnectionStatusChanged,
    ConnectionRemoved,

    // Credential lifecycle
    CredentialsStored,
    CredentialsRefreshed,
    CredentialsRefreshFailed,
    CredentialsRevoked,

    // Discovery
    DiscoveryRunStarted,
    DiscoveryRunCompleted,
    DiscoveryRunFailed,
    AutomationDiscovered,

    // Risk & detection
    RiskScoreChanged,
    RiskManuallyReassessed,
    CorrelationLinkCreated,
    BaselineRecorded,
    DriftAlertRaised,

    // System
    SystemStartup,
    SystemShutdown,
    SchemaVerified,

    // Custom (for extensions)
    Custom(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Custom(name) => write!(f, "{}", name),
            other => {
                // SCREAMING_SNAKE_CASE of the variant name, matching serde
                let json = serde_json::to_string(other).map_err(|_| std::fmt::Error)?;
                write!(f, "{}", json.trim_matches('"'))
            }
        }
    }
}

/// Core audit event structure. Persisted rows keep `timestamp` (event time)
/// and `created_at` (insertion time) as distinct columns; everything beyond
/// the core identity lands in the `details` JSONB payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this event
    pub id: Uuid,
    /// Event type
    pub event_type: EventType,
    /// Event severity
    pub severity: EventSeverity,
    /// Timestamp when the event occurred (not when the row was written)
    pub timestamp: DateTime<Utc>,
    /// Organization the event belongs to
    pub organization_id: Option<Uuid>,
    /// End user who performed the action, when one exists
    pub user_id: Option<String>,
    /// Resource being acted upon
    pub resource_type: Option<String>,
    /// ID of the resource
    pub resource_id: Option<String>,
    /// Human-readable description
    pub description: String,
    /// Structured metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn builder(event_type: EventType, description: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder {
            event: AuditEvent {
                id: Uuid::new_v4(),
                event_type,
                severity: EventSeverity::Info,
                timestamp: Utc::now(),
                organization_id: None,
                user_id: None,
                resource_type: None,
                resource_id: None,
                description: description.into(),
                metadata: HashMap::new(),
            },
        }
    }

    /// Serialized payload for the `details` column.
    pub fn details_json(&self) -> serde_json::Value {
        serde_json::json!({
            "severity": self.severity,
            "resource_type": self.resource_type,
            "resource_id": self.resource_id,
            "description": self.description,
            "metadata": self.metadata,
        })
    }
}

pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn organization(mut self, organization_id: Uuid) -> Self {
        self.event.organization_id = Some(organization_id);
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.event.user_id = Some(user_id.into());
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.event.resource_type = Some(resource_type.into());
        self.event.resource_id = Some(resource_id.into());
        self
    }

    /// Event time, when it differs from "now" (e.g. replayed activity).
    pub fn occurred_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.event.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}
