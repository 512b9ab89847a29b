//! Slack connector.
//!
//! Automation inventory comes from the approved-apps admin API plus bot
//! users; activity comes from the Enterprise audit log feed. Both are
//! normalized into the canonical shapes, and entries without an actor or a
//! parsable timestamp are dropped and counted.

use super::{get_json_with_backoff, non_empty, ActivityStream, Connector};
use crate::error::Result;
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use singura_core::{
    ActionType, ActivityEvent, AutomationCandidate, AutomationType, DetectionMetadata,
    MetricsRegistry, OAuthCredentials, PlatformConnection, PlatformMetadata, PlatformType,
};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://slack.com";
const AUDIT_PAGE_LIMIT: u32 = 200;

pub struct SlackConnector {
    http: reqwest::Client,
    base_url: String,
    metrics: Arc<MetricsRegistry>,
}

impl SlackConnector {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            metrics,
        }
    }

    /// Point the connector at a test double.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn drop_event(&self) {
        self.metrics
            .connector_events_dropped
            .with_label_values(&["slack"])
            .inc();
    }

    fn app_candidate(app: &serde_json::Value) -> Option<AutomationCandidate> {
        let external_id = non_empty(app.get("id").and_then(|v| v.as_str()))?;
        let name = non_empty(app.get("name").and_then(|v| v.as_str()))?;

        let scopes: Vec<String> = app
            .get("scopes")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let directory_approved = app
            .get("is_app_directory_approved")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let metadata = PlatformMetadata::new(serde_json::json!({
            "scopes": scopes,
            "publisher": app.get("app_homepage_url").and_then(|v| v.as_str()),
            "is_app_directory_approved": directory_approved,
        }))
        .ok()?;

        Some(AutomationCandidate {
            external_id,
            name,
            description: app
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            automation_type: AutomationType::Integration,
            platform_metadata: metadata,
            detection_metadata: DetectionMetadata {
                well_known_integration: Some(directory_approved),
                ..Default::default()
            },
            permissions_required: scopes,
            last_triggered_at: None,
        })
    }

    fn bot_candidate(member: &serde_json::Value) -> Option<AutomationCandidate> {
        if !member.get("is_bot").and_then(|v| v.as_bool()).unwrap_or(false) {
            return None;
        }
        let external_id = non_empty(member.get("id").and_then(|v| v.as_str()))?;
        let name = non_empty(
            member
                .get("profile")
                .and_then(|p| p.get("real_name"))
                .and_then(|v| v.as_str())
                .or_else(|| member.get("name").and_then(|v| v.as_str())),
        )?;

        let metadata = PlatformMetadata::new(serde_json::json!({
            "team_id": member.get("team_id").and_then(|v| v.as_str()),
            "app_id": member.get("profile").and_then(|p| p.get("api_app_id")).and_then(|v| v.as_str()),
        }))
        .ok()?;

        Some(AutomationCandidate {
            external_id,
            name,
            description: None,
            automation_type: AutomationType::Bot,
            platform_metadata: metadata,
            detection_metadata: DetectionMetadata::default(),
            permissions_required: Vec::new(),
            last_triggered_at: None,
        })
    }

    /// Map a Slack audit action onto the canonical action set. Unknown
    /// actions are not activity we detect on; the caller drops them.
    fn map_action(action: &str) -> Option<ActionType> {
        match action {
            "file_uploaded" => Some(ActionType::FileCreate),
            "file_edited" => Some(ActionType::FileEdit),
            "file_shared" => Some(ActionType::FileShare),
            "file_downloaded" | "file_download_blocked" => Some(ActionType::DataExfiltration),
            "anyone_file_shared" | "public_link_created" => Some(ActionType::Sharing),
            "permissions_changed" | "role_assigned" => Some(ActionType::PermissionChange),
            "retention_policy_changed" | "workspace_acl_updated" => Some(ActionType::AclChange),
            "message_sent_by_workflow" | "workflow_executed" => Some(ActionType::ScriptExecution),
            _ => None,
        }
    }

    fn audit_entry_to_event(&self, entry: &serde_json::Value) -> Option<ActivityEvent> {
        let action = entry.get("action").and_then(|v| v.as_str())?;
        let action_type = Self::map_action(action)?;

        let actor_id = non_empty(
            entry
                .get("actor")
                .and_then(|a| a.get("user"))
                .and_then(|u| u.get("id"))
                .and_then(|v| v.as_str()),
        );
        let timestamp = entry
            .get("date_create")
            .and_then(|v| v.as_i64())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        let (Some(actor_id), Some(timestamp)) = (actor_id, timestamp) else {
            self.drop_event();
            return None;
        };

        Some(ActivityEvent {
            external_actor_id: actor_id,
            action_type,
            timestamp,
            resource: entry
                .get("entity")
                .and_then(|e| e.get("file"))
                .and_then(|f| f.get("id"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            scope_hints: Vec::new(),
            payload_bytes: entry
                .get("details")
                .and_then(|d| d.get("size"))
                .and_then(|v| v.as_i64()),
        })
    }
}

#[async_trait]
impl Connector for SlackConnector {
    fn platform(&self) -> PlatformType {
        PlatformType::Slack
    }

    async fn list_automations(
        &self,
        _connection: &PlatformConnection,
        credentials: &OAuthCredentials,
    ) -> Result<Vec<AutomationCandidate>> {
        let mut candidates = Vec::new();

        let apps_url = format!("{}/api/admin.apps.approved.list", self.base_url);
        let apps = get_json_with_backoff(&self.http, &apps_url, &credentials.access_token).await?;
        for approved in apps
            .get("approved_apps")
            .and_then(|v| v.as_array())
            .unwrap_or(&Vec::new())
        {
            if let Some(candidate) = approved.get("app").and_then(Self::app_candidate) {
                candidates.push(candidate);
            } else {
                self.drop_event();
            }
        }

        let users_url = format!("{}/api/users.list", self.base_url);
        let users = get_json_with_backoff(&self.http, &users_url, &credentials.access_token).await?;
        for member in users
            .get("members")
            .and_then(|v| v.as_array())
            .unwrap_or(&Vec::new())
        {
            if let Some(candidate) = Self::bot_candidate(member) {
                candidates.push(candidate);
            }
        }

        debug!(count = candidates.len(), "Enumerated Slack automations");
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
            let mut cursor: Option<String> = None;

            loop {
                let mut url = format!(
                    "{}/audit/v1/logs?oldest={}&latest={}&limit={}",
                    base_url,
                    since.timestamp(),
                    until.timestamp(),
                    AUDIT_PAGE_LIMIT
                );
                if let Some(cursor) = &cursor {
                    url.push_str(&format!("&cursor={}", cursor));
                }

                let page = get_json_with_backoff(&http, &url, &token).await?;

                for entry in page
                    .get("entries")
                    .and_then(|v| v.as_array())
                    .unwrap_or(&Vec::new())
                {
                    let action = entry.get("action").and_then(|v| v.as_str());
                    let Some(action) = action else { continue };
                    let Some(action_type) = SlackConnector::map_action(action) else {
                        continue;
                    };

                    let actor_id = non_empty(
                        entry
                            .get("actor")
                            .and_then(|a| a.get("user"))
                            .and_then(|u| u.get("id"))
                            .and_then(|v| v.as_str()),
                    );
                    let timestamp = entry
                        .get("date_create")
                        .and_then(|v| v.as_i64())
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

                    let (Some(actor_id), Some(timestamp)) = (actor_id, timestamp) else {
                        metrics
                            .connector_events_dropped
                            .with_label_values(&["slack"])
                            .inc();
                        continue;
                    };

                    yield ActivityEvent {
                        external_actor_id: actor_id,
                        action_type,
                        timestamp,
                        resource: entry
                            .get("entity")
                            .and_then(|e| e.get("file"))
                            .and_then(|f| f.get("id"))
                            .and_then(|v| v.as_str())
                            .map(str::to_string),
                        scope_hints: Vec::new(),
                        payload_bytes: entry
                            .get("details")
                            .and_then(|d| d.get("size"))
                            .and_then(|v| v.as_i64()),
                    };
                }

                cursor = page
                    .get("response_metadata")
                    .and_then(|m| m.get("next_cursor"))
                    .and_then(|v| v.as_str())
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);

                if cursor.is_none() {
                    break;
                }
            }
        })
    }
}
