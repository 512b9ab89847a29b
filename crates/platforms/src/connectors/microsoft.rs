//! Microsoft 365 connector.
//!
//! Service principals from Microsoft Graph form the automation inventory
//! (with delegated scopes joined in from the permission-grant list);
//! directory audit entries form the activity feed.

use super::{get_json_with_backoff, non_empty, parse_timestamp, ActivityStream, Connector};
use crate::error::Result;
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use singura_core::{
    ActionType, ActivityEvent, AutomationCandidate, AutomationType, DetectionMetadata,
    MetricsRegistry, OAuthCredentials, PlatformConnection, PlatformMetadata, PlatformType,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com";

pub struct MicrosoftConnector {
    http: reqwest::Client,
    base_url: String,
    metrics: Arc<MetricsRegistry>,
}

impl MicrosoftConnector {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            metrics,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn principal_candidate(
        principal: &serde_json::Value,
        grants: &HashMap<String, Vec<String>>,
    ) -> Option<AutomationCandidate> {
        let external_id = non_empty(principal.get("appId").and_then(|v| v.as_str()))?;
        let name = non_empty(principal.get("displayName").and_then(|v| v.as_str()))?;

        let verified_publisher = principal
            .get("verifiedPublisher")
            .and_then(|p| p.get("displayName"))
            .and_then(|v| v.as_str());

        let tags: Vec<String> = principal
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let automation_type = if tags.iter().any(|t| t == "WindowsAzureActiveDirectoryIntegratedApp") {
            AutomationType::Integration
        } else {
            AutomationType::ServiceAccount
        };

        let metadata = PlatformMetadata::new(serde_json::json!({
            "object_id": principal.get("id").and_then(|v| v.as_str()),
            "publisher": verified_publisher,
            "tags": tags,
            "tenant_id": principal.get("appOwnerOrganizationId").and_then(|v| v.as_str()),
        }))
        .ok()?;

        Some(AutomationCandidate {
            external_id: external_id.clone(),
            name,
            description: principal
                .get("appDescription")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            automation_type,
            platform_metadata: metadata,
            detection_metadata: DetectionMetadata {
                verified_publisher: Some(verified_publisher.is_some()),
                ..Default::default()
            },
            permissions_required: grants.get(&external_id).cloned().unwrap_or_default(),
            last_triggered_at: None,
        })
    }

    fn map_activity(display_name: &str) -> Option<ActionType> {
        match display_name {
            "Upload file" => Some(ActionType::FileCreate),
            "Update file" => Some(ActionType::FileEdit),
            "Share file" => Some(ActionType::FileShare),
            "Add member to role" | "Update application" => Some(ActionType::PermissionChange),
            "Update conditional access policy" => Some(ActionType::AclChange),
            "Create sharing link" => Some(ActionType::Sharing),
            "Download file" | "Export mailbox" => Some(ActionType::DataExfiltration),
            "Send email" => Some(ActionType::EmailSend),
            "Run automation" => Some(ActionType::ScriptExecution),
            _ => None,
        }
    }
}

#[async_trait]
impl Connector for MicrosoftConnector {
    fn platform(&self) -> PlatformType {
        PlatformType::Microsoft
    }

    async fn list_automations(
        &self,
        _connection: &PlatformConnection,
        credentials: &OAuthCredentials,
    ) -> Result<Vec<AutomationCandidate>> {
        // Delegated scopes by client app id, joined into the principals.
        let grants_url = format!("{}/v1.0/oauth2PermissionGrants", self.base_url);
        let grants_doc =
            get_json_with_backoff(&self.http, &grants_url, &credentials.access_token).await?;

        let mut grants: HashMap<String, Vec<String>> = HashMap::new();
        for grant in grants_doc
            .get("value")
            .and_then(|v| v.as_array())
            .unwrap_or(&Vec::new())
        {
            let Some(client_id) = grant.get("clientId").and_then(|v| v.as_str()) else {
                continue;
            };
            let scopes = grant
                .get("scope")
                .and_then(|v| v.as_str())
                .map(|s| {
                    s.split_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            grants
                .entry(client_id.to_string())
                .or_default()
                .extend(scopes);
        }

        let principals_url = format!("{}/v1.0/servicePrincipals", self.base_url);
        let principals =
            get_json_with_backoff(&self.http, &principals_url, &credentials.access_token).await?;

        let mut candidates = Vec::new();
        for principal in principals
            .get("value")
            .and_then(|v| v.as_array())
            .unwrap_or(&Vec::new())
        {
            if let Some(candidate) = Self::principal_candidate(principal, &grants) {
                candidates.push(candidate);
            } else {
                self.metrics
                    .connector_events_dropped
                    .with_label_values(&["microsoft"])
                    .inc();
            }
        }

        debug!(count = candidates.len(), "Enumerated Microsoft automations");
        Ok(candidates)
    }

    fn stream_activity(
        &self,
        _connection: &PlatformConnection,
        credentials: &OAuthCredentials,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> ActivityStream {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let token = credentials.access_token.clone();
        let metrics = self.metrics.clone();

        Box::pin(try_stream! {
            let mut next_link: Option<String> = Some(format!(
                "{}/v1.0/auditLogs/directoryAudits?$filter=activityDateTime ge {} and activityDateTime le {}",
                base_url,
                since.to_rfc3339(),
                until.to_rfc3339()
            ));

            while let Some(url) = next_link.take() {
                let page = get_json_with_backoff(&http, &url, &token).await?;

                for entry in page
                    .get("value")
                    .and_then(|v| v.as_array())
                    .unwrap_or(&Vec::new())
                {
                    let Some(display_name) =
                        entry.get("activityDisplayName").and_then(|v| v.as_str())
                    else {
                        continue;
                    };
                    let Some(action_type) = MicrosoftConnector::map_activity(display_name) else {
                        continue;
                    };

                    let actor_id = non_empty(
                        entry
                            .get("initiatedBy")
                            .and_then(|i| {
                                i.get("app")
                                    .and_then(|a| a.get("appId"))
                                    .or_else(|| i.get("user").and_then(|u| u.get("id")))
                            })
                            .and_then(|v| v.as_str()),
                    );
                    let timestamp = parse_timestamp(
                        entry.get("activityDateTime").and_then(|v| v.as_str()),
                    );

                    let (Some(actor_id), Some(timestamp)) = (actor_id, timestamp) else {
                        metrics
                            .connector_events_dropped
                            .with_label_values(&["microsoft"])
                            .inc();
                        continue;
                    };

                    yield ActivityEvent {
                        external_actor_id: actor_id,
                        action_type,
                        timestamp,
                        resource: entry
                            .get("targetResources")
                            .and_then(|v| v.as_array())
                            .and_then(|arr| arr.first())
                            .and_then(|r| r.get("id"))
                            .and_then(|v| v.as_str())
                            .map(str::to_string),
                        scope_hints: Vec::new(),
                        payload_bytes: None,
                    };
                }

                next_link = page
                    .get("@odata.nextLink")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }
        })
    }
}
