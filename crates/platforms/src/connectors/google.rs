//! Google Workspace connector.
//!
//! Third-party OAuth grants come from the Admin SDK token inventory and
//! Apps Script projects from Drive; activity comes from the Admin Reports
//! feed. This connector is the single place where `platformMetadata.scopes`
//! is mapped into `permissions_required` (only when the top-level list
//! would otherwise be empty).

use super::{get_json_with_backoff, non_empty, parse_timestamp, ActivityStream, Connector};
use crate::error::Result;
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use singura_core::{
    ActionType, ActivityEvent, AiProviderInfo, AutomationCandidate, AutomationType,
    DetectionMetadata, MetricsRegistry, OAuthCredentials, PlatformConnection, PlatformMetadata,
    PlatformType,
};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://admin.googleapis.com";

/// AI vendors recognized directly from an OAuth grant's display text.
const KNOWN_AI_VENDORS: &[&str] = &["openai", "anthropic", "gemini"];

pub struct GoogleConnector {
    http: reqwest::Client,
    base_url: String,
    metrics: Arc<MetricsRegistry>,
}

impl GoogleConnector {
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

    fn token_candidate(item: &serde_json::Value) -> Option<AutomationCandidate> {
        let external_id = non_empty(item.get("clientId").and_then(|v| v.as_str()))?;
        let name = non_empty(item.get("displayText").and_then(|v| v.as_str()))
            .unwrap_or_else(|| external_id.clone());

        let scopes: Vec<String> = item
            .get("scopes")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let metadata = PlatformMetadata::new(serde_json::json!({
            "scopes": scopes,
            "native_app": item.get("nativeApp").and_then(|v| v.as_bool()),
            "anonymous": item.get("anonymous").and_then(|v| v.as_bool()),
        }))
        .ok()?;

        let lowered = name.to_lowercase();
        let ai_provider = KNOWN_AI_VENDORS
            .iter()
            .find(|vendor| lowered.contains(*vendor))
            .map(|vendor| AiProviderInfo {
                vendor: (*vendor).to_string(),
                client_id: Some(external_id.clone()),
                api_key_suffix: None,
                fingerprint: None,
            });

        let mut candidate = AutomationCandidate {
            external_id,
            name,
            description: None,
            automation_type: AutomationType::Integration,
            platform_metadata: metadata,
            detection_metadata: DetectionMetadata {
                ai_provider,
                ..Default::default()
            },
            permissions_required: Vec::new(),
            last_triggered_at: None,
        };

        // The one place scopes flow from platform metadata into the
        // top-level permission list.
        if candidate.permissions_required.is_empty() {
            candidate.permissions_required = candidate.platform_metadata.scopes();
        }

        Some(candidate)
    }

    fn script_candidate(file: &serde_json::Value) -> Option<AutomationCandidate> {
        let external_id = non_empty(file.get("id").and_then(|v| v.as_str()))?;
        let name = non_empty(file.get("name").and_then(|v| v.as_str()))?;

        let metadata = PlatformMetadata::new(serde_json::json!({
            "mime_type": file.get("mimeType").and_then(|v| v.as_str()),
            "owners": file.get("owners"),
        }))
        .ok()?;

        Some(AutomationCandidate {
            external_id,
            name,
            description: file
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            automation_type: AutomationType::Script,
            platform_metadata: metadata,
            detection_metadata: DetectionMetadata::default(),
            permissions_required: Vec::new(),
            last_triggered_at: parse_timestamp(
                file.get("modifiedTime").and_then(|v| v.as_str()),
            ),
        })
    }

    fn map_event_name(name: &str) -> Option<ActionType> {
        match name {
            "create" | "upload" => Some(ActionType::FileCreate),
            "edit" | "rename" => Some(ActionType::FileEdit),
            "share" => Some(ActionType::FileShare),
            "change_user_access" | "change_document_access_scope" => {
                Some(ActionType::PermissionChange)
            }
            "change_acl_editors" => Some(ActionType::AclChange),
            "change_document_visibility" => Some(ActionType::Sharing),
            "download" | "export" => Some(ActionType::DataExfiltration),
            "email_send" => Some(ActionType::EmailSend),
            "script_execution" | "apps_script_execution" => Some(ActionType::ScriptExecution),
            _ => None,
        }
    }
}

#[async_trait]
impl Connector for GoogleConnector {
    fn platform(&self) -> PlatformType {
        PlatformType::Google
    }

    async fn list_automations(
        &self,
        connection: &PlatformConnection,
        credentials: &OAuthCredentials,
    ) -> Result<Vec<AutomationCandidate>> {
        let mut candidates = Vec::new();

        let tokens_url = format!(
            "{}/admin/directory/v1/users/{}/tokens",
            self.base_url, connection.platform_user_id
        );
        let tokens =
            get_json_with_backoff(&self.http, &tokens_url, &credentials.access_token).await?;
        for item in tokens
            .get("items")
            .and_then(|v| v.as_array())
            .unwrap_or(&Vec::new())
        {
            if let Some(candidate) = Self::token_candidate(item) {
                candidates.push(candidate);
            } else {
                self.metrics
                    .connector_events_dropped
                    .with_label_values(&["google"])
                    .inc();
            }
        }

        let scripts_url = format!(
            "{}/drive/v3/files?q=mimeType%3D%27application%2Fvnd.google-apps.script%27",
            self.base_url
        );
        let scripts =
            get_json_with_backoff(&self.http, &scripts_url, &credentials.access_token).await?;
        for file in scripts
            .get("files")
            .and_then(|v| v.as_array())
            .unwrap_or(&Vec::new())
        {
            if let Some(candidate) = Self::script_candidate(file) {
                candidates.push(candidate);
            }
        }

        debug!(count = candidates.len(), "Enumerated Google automations");
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
            let mut page_token: Option<String> = None;

            loop {
                let mut url = format!(
                    "{}/admin/reports/v1/activity/users/all/applications/drive?startTime={}&endTime={}",
                    base_url,
                    since.to_rfc3339(),
                    until.to_rfc3339()
                );
                if let Some(token_value) = &page_token {
                    url.push_str(&format!("&pageToken={}", token_value));
                }

                let page = get_json_with_backoff(&http, &url, &token).await?;

                for item in page
                    .get("items")
                    .and_then(|v| v.as_array())
                    .unwrap_or(&Vec::new())
                {
                    let actor_id = non_empty(
                        item.get("actor")
                            .and_then(|a| a.get("profileId").or_else(|| a.get("email")))
                            .and_then(|v| v.as_str()),
                    );
                    let timestamp = parse_timestamp(
                        item.get("id")
                            .and_then(|id| id.get("time"))
                            .and_then(|v| v.as_str()),
                    );

                    let (Some(actor_id), Some(timestamp)) = (actor_id, timestamp) else {
                        metrics
                            .connector_events_dropped
                            .with_label_values(&["google"])
                            .inc();
                        continue;
                    };

                    for event in item
                        .get("events")
                        .and_then(|v| v.as_array())
                        .unwrap_or(&Vec::new())
                    {
                        let Some(name) = event.get("name").and_then(|v| v.as_str()) else {
                            continue;
                        };
                        let Some(action_type) = GoogleConnector::map_event_name(name) else {
                            continue;
                        };

                        let mut resource = None;
                        let mut payload_bytes = None;
                        for parameter in event
                            .get("parameters")
                            .and_then(|v| v.as_array())
                            .unwrap_or(&Vec::new())
                        {
                            match parameter.get("name").and_then(|v| v.as_str()) {
                                Some("doc_id") => {
                                    resource = parameter
                                        .get("value")
                                        .and_then(|v| v.as_str())
                                        .map(str::to_string);
                                }
                                Some("size_bytes") => {
                                    payload_bytes =
                                        parameter.get("intValue").and_then(|v| {
                                            v.as_str().and_then(|s| s.parse::<i64>().ok())
                                        });
                                }
                                _ => {}
                            }
                        }

                        yield ActivityEvent {
                            external_actor_id: actor_id.clone(),
                            action_type,
                            timestamp,
                            resource,
                            scope_hints: Vec::new(),
                            payload_bytes,
                        };
                    }
                }

                page_token = page
                    .get("nextPageToken")
                    .and_then(|v| v.as_str())
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);

                if page_token.is_none() {
                    break;
                }
            }
        })
    }
}
