use crate::types::{ConnectionStatus, PlatformType, RiskLevel, RunStatus};
use crate::{error::Result, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminated union of everything that can travel over the realtime
/// channel. The `type` tag matches the wire contract; invalid shapes are
/// unrepresentable, and the remaining value constraints live in
/// [`RealtimeMessage::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimePayload {
    #[serde(rename = "connection.update")]
    ConnectionUpdate {
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
        status: ConnectionStatus,
        platform: PlatformType,
    },

    #[serde(rename = "discovery.progress")]
    DiscoveryProgress {
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
        /// Percentage in [0, 100].
        progress: u8,
        status: RunStatus,
        #[serde(rename = "itemsFound")]
        items_found: u32,
    },

    #[serde(rename = "automation.discovered")]
    AutomationDiscovered {
        #[serde(rename = "automationId")]
        automation_id: Uuid,
        name: String,
        platform: PlatformType,
        #[serde(rename = "riskLevel")]
        risk_level: RiskLevel,
        #[serde(skip_serializing_if = "Option::is_none")]
        detection_metadata: Option<serde_json::Value>,
    },

    #[serde(rename = "risk.score_updated")]
    RiskScoreUpdated {
        #[serde(rename = "automationId")]
        automation_id: Uuid,
        #[serde(rename = "oldScore")]
        old_score: u8,
        #[serde(rename = "newScore")]
        new_score: u8,
        reason: String,
    },

    #[serde(rename = "risk.high_alert")]
    RiskHighAlert {
        #[serde(rename = "automationId")]
        automation_id: Uuid,
        #[serde(rename = "riskScore")]
        risk_score: u8,
        #[serde(rename = "riskLevel")]
        risk_level: RiskLevel,
        #[serde(rename = "detectionPatterns")]
        detection_patterns: Vec<String>,
    },

    #[serde(rename = "system.notification")]
    SystemNotification {
        level: NotificationLevel,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// One message on the realtime channel, scoped to an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: RealtimePayload,
}

impl RealtimeMessage {
    pub fn new(organization_id: Uuid, payload: RealtimePayload) -> Self {
        Self {
            organization_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Wire tag of the payload, for logging and counters.
    pub fn type_tag(&self) -> &'static str {
        match self.payload {
            RealtimePayload::ConnectionUpdate { .. } => "connection.update",
            RealtimePayload::DiscoveryProgress { .. } => "discovery.progress",
            RealtimePayload::AutomationDiscovered { .. } => "automation.discovered",
            RealtimePayload::RiskScoreUpdated { .. } => "risk.score_updated",
            RealtimePayload::RiskHighAlert { .. } => "risk.high_alert",
            RealtimePayload::SystemNotification { .. } => "system.notification",
        }
    }

    /// Value constraints the type system does not capture. Broadcasting
    /// drops (and counts) messages that fail here; it never panics.
    pub fn validate(&self) -> Result<()> {
        if self.organization_id.is_nil() {
            return Err(Error::schema_validation(
                "realtime message must be scoped to an organization",
            ));
        }

        match &self.payload {
            RealtimePayload::DiscoveryProgress { progress, .. } => {
                if *progress > 100 {
                    return Err(Error::schema_validation(format!(
                        "discovery progress {} out of range [0, 100]",
                        progress
                    )));
                }
            }
            RealtimePayload::RiskScoreUpdated {
                old_score,
                new_score,
                reason,
                ..
            } => {
                if *old_score > 100 || *new_score > 100 {
                    return Err(Error::schema_validation("risk score out of range [0, 100]"));
                }
                if reason.is_empty() {
                    return Err(Error::schema_validation(
                        "risk.score_updated requires a reason",
                    ));
                }
            }
            RealtimePayload::RiskHighAlert { risk_score, .. } => {
                if *risk_score > 100 {
                    return Err(Error::schema_validation("risk score out of range [0, 100]"));
                }
            }
            RealtimePayload::AutomationDiscovered { name, .. } => {
                if name.is_empty() {
                    return Err(Error::schema_validation(
                        "automation.discovered requires a name",
                    ));
                }
            }
            RealtimePayload::SystemNotification { message, .. } => {
                if message.is_empty() {
                    return Err(Error::schema_validation(
                        "system.notification requires a message",
                    ));
                }
            }
            RealtimePayload::ConnectionUpdate { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_round_trip() {
        let msg = RealtimeMessage::new(
            Uuid::new_v4(),
            RealtimePayload::SystemNotification {
                level: NotificationLevel::Warning,
                message: "connection requires re-authentication".into(),
            },
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "system.notification");
        assert_eq!(json["level"], "warning");
        assert!(json["timestamp"].is_string());

        let parsed: RealtimeMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_progress_range_validation() {
        let valid = RealtimeMessage::new(
            Uuid::new_v4(),
            RealtimePayload::DiscoveryProgress {
                connection_id: Uuid::new_v4(),
                progress: 100,
                status: RunStatus::Running,
                items_found: 3,
            },
        );
        assert!(valid.validate().is_ok());

        let invalid = RealtimeMessage::new(
            Uuid::new_v4(),
            RealtimePayload::DiscoveryProgress {
                connection_id: Uuid::new_v4(),
                progress: 101,
                status: RunStatus::Running,
                items_found: 3,
            },
        );
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_nil_organization_rejected() {
        let msg = RealtimeMessage::new(
            Uuid::nil(),
            RealtimePayload::SystemNotification {
                level: NotificationLevel::Info,
                message: "hello".into(),
            },
        );
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_camel_case_payload_fields() {
        let msg = RealtimeMessage::new(
            Uuid::new_v4(),
            RealtimePayload::RiskScoreUpdated {
                automation_id: Uuid::new_v4(),
                old_score: 45,
                new_score: 72,
                reason: "activity_spike".into(),
            },
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "risk.score_updated");
        assert_eq!(json["oldScore"], 45);
        assert_eq!(json["newScore"], 72);
        assert!(json["organizationId"].is_string());
    }
}
