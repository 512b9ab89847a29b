//! Shared domain model for the Singura platform.
//!
//! Enums are stored as snake_case strings in Postgres; repositories bind
//! `as_str()` and parse with `FromStr`, mirroring how the audit backend
//! serializes its event types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound for the platform metadata envelope, serialized.
pub const PLATFORM_METADATA_MAX_BYTES: usize = 64 * 1024;

/// Safety margin, in seconds, applied when deciding whether stored
/// credentials are still usable: anything expiring within this window is
/// refreshed first.
pub const CREDENTIAL_VALIDITY_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Slack,
    Google,
    Microsoft,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Slack => "slack",
            PlatformType::Google => "google",
            PlatformType::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slack" => Ok(PlatformType::Slack),
            "google" => Ok(PlatformType::Google),
            "microsoft" => Ok(PlatformType::Microsoft),
            other => Err(crate::Error::validation(format!(
                "unknown platform type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
    Error,
    Inactive,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConnectionStatus::Active),
            "error" => Ok(ConnectionStatus::Error),
            "inactive" => Ok(ConnectionStatus::Inactive),
            other => Err(crate::Error::validation(format!(
                "unknown connection status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }

    /// Terminal states are immutable once written.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Partial
        )
    }
}

impl FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "partial" => Ok(RunStatus::Partial),
            other => Err(crate::Error::validation(format!(
                "unknown run status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationType {
    Bot,
    Script,
    Workflow,
    Integration,
    ServiceAccount,
}

impl AutomationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationType::Bot => "bot",
            AutomationType::Script => "script",
            AutomationType::Workflow => "workflow",
            AutomationType::Integration => "integration",
            AutomationType::ServiceAccount => "service_account",
        }
    }
}

impl FromStr for AutomationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot" => Ok(AutomationType::Bot),
            "script" => Ok(AutomationType::Script),
            "workflow" => Ok(AutomationType::Workflow),
            "integration" => Ok(AutomationType::Integration),
            "service_account" => Ok(AutomationType::ServiceAccount),
            other => Err(crate::Error::validation(format!(
                "unknown automation type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Level thresholds: < 30 low, < 60 medium, < 85 high, else critical.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => RiskLevel::Low,
            30..=59 => RiskLevel::Medium,
            60..=84 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(crate::Error::validation(format!(
                "unknown risk level: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTrigger {
    InitialDiscovery,
    ActivitySpike,
    PermissionChange,
    DetectorUpdate,
    ManualReassessment,
}

impl RiskTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTrigger::InitialDiscovery => "initial_discovery",
            RiskTrigger::ActivitySpike => "activity_spike",
            RiskTrigger::PermissionChange => "permission_change",
            RiskTrigger::DetectorUpdate => "detector_update",
            RiskTrigger::ManualReassessment => "manual_reassessment",
        }
    }

    /// Triggers that always append a history entry, even when the computed
    /// score equals the current one (audit-trail preservation).
    pub fn always_appends(&self) -> bool {
        matches!(
            self,
            RiskTrigger::ManualReassessment | RiskTrigger::DetectorUpdate
        )
    }
}

impl FromStr for RiskTrigger {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial_discovery" => Ok(RiskTrigger::InitialDiscovery),
            "activity_spike" => Ok(RiskTrigger::ActivitySpike),
            "permission_change" => Ok(RiskTrigger::PermissionChange),
            "detector_update" => Ok(RiskTrigger::DetectorUpdate),
            "manual_reassessment" => Ok(RiskTrigger::ManualReassessment),
            other => Err(crate::Error::validation(format!(
                "unknown risk trigger: {}",
                other
            ))),
        }
    }
}

/// Canonical action types shared by every connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FileCreate,
    FileEdit,
    FileShare,
    PermissionChange,
    EmailSend,
    ScriptExecution,
    AclChange,
    Sharing,
    DataExfiltration,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::FileCreate => "file_create",
            ActionType::FileEdit => "file_edit",
            ActionType::FileShare => "file_share",
            ActionType::PermissionChange => "permission_change",
            ActionType::EmailSend => "email_send",
            ActionType::ScriptExecution => "script_execution",
            ActionType::AclChange => "acl_change",
            ActionType::Sharing => "sharing",
            ActionType::DataExfiltration => "data_exfiltration",
        }
    }

    /// Action types that modify who can see a resource.
    pub fn widens_access(&self) -> bool {
        matches!(
            self,
            ActionType::PermissionChange | ActionType::AclChange | ActionType::Sharing
        )
    }
}

/// One normalized activity record produced by a platform connector.
/// Connectors drop upstream items with missing actor ids or timestamps
/// before they ever reach this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub external_actor_id: String,
    pub action_type: ActionType,
    pub timestamp: DateTime<Utc>,
    pub resource: Option<String>,
    #[serde(default)]
    pub scope_hints: Vec<String>,
    /// Payload size where the platform reports one (file exports, attachments).
    pub payload_bytes: Option<i64>,
}

/// Decrypted OAuth credential set for one platform connection.
///
/// Instances of this type exist only in memory; at rest they live as
/// AES-GCM ciphertext in `encrypted_credentials`. Never log the token
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub platform_specific: serde_json::Value,
}

impl OAuthCredentials {
    /// Credentials without an expiry are assumed valid.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                expires_at - now <= Duration::seconds(CREDENTIAL_VALIDITY_MARGIN_SECS)
            }
            None => false,
        }
    }
}

/// Bounded free-form metadata captured from the platform, accessed through
/// typed getters. The raw JSON is kept for forward compatibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformMetadata {
    raw: serde_json::Value,
}

impl PlatformMetadata {
    pub fn new(raw: serde_json::Value) -> crate::Result<Self> {
        let size = serde_json::to_vec(&raw)?.len();
        if size > PLATFORM_METADATA_MAX_BYTES {
            return Err(crate::Error::validation(format!(
                "platform metadata exceeds {} bytes ({})",
                PLATFORM_METADATA_MAX_BYTES, size
            )));
        }
        Ok(Self { raw })
    }

    pub fn empty() -> Self {
        Self {
            raw: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    /// OAuth scopes reported inside the platform payload.
    pub fn scopes(&self) -> Vec<String> {
        self.raw
            .get("scopes")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn publisher(&self) -> Option<&str> {
        self.raw.get("publisher").and_then(|v| v.as_str())
    }

    /// Microsoft tenant id, where present.
    pub fn tenant_id(&self) -> Option<&str> {
        self.raw.get("tenant_id").and_then(|v| v.as_str())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(|v| v.as_str())
    }
}

/// Identity of the AI vendor an automation talks to, as far as discovery
/// could establish it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiProviderInfo {
    pub vendor: String,
    pub client_id: Option<String>,
    pub api_key_suffix: Option<String>,
    /// Pre-computed cross-platform fingerprint, when the connector could
    /// derive one directly.
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetadata {
    #[serde(default)]
    pub detection_patterns: Vec<String>,
    pub ai_provider: Option<AiProviderInfo>,
    pub legitimacy_score: Option<f64>,
    pub verified_publisher: Option<bool>,
    pub well_known_integration: Option<bool>,
    /// Execution cadence, when one was discovered (cron-like or interval).
    pub schedule: Option<String>,
}

/// A single signed contribution to a risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    #[serde(rename = "type")]
    pub factor_type: String,
    pub score: i32,
    pub description: Option<String>,
}

impl RiskFactor {
    pub fn new(factor_type: impl Into<String>, score: i32) -> Self {
        Self {
            factor_type: factor_type.into(),
            score,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One append-only entry in an automation's risk history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreEntry {
    pub timestamp: DateTime<Utc>,
    pub score: u8,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub trigger: RiskTrigger,
    #[serde(default)]
    pub rapid_change: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub plan_tier: String,
    pub max_connections: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConnection {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub platform_type: PlatformType,
    pub platform_user_id: String,
    pub workspace_id: Option<String>,
    pub display_name: String,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub metadata: PlatformMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored form of a credential set; produced and consumed by the crypto
/// module only.
#[derive(Debug, Clone)]
pub struct EncryptedCredentialRecord {
    pub platform_connection_id: Uuid,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub key_version: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRun {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub platform_connection_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_found: i32,
    pub error: Option<String>,
}

/// An automation as enumerated by a connector, before persistence. The
/// discovery orchestrator upserts these by
/// `(organization_id, platform_connection_id, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationCandidate {
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub automation_type: AutomationType,
    pub platform_metadata: PlatformMetadata,
    pub detection_metadata: DetectionMetadata,
    #[serde(default)]
    pub permissions_required: Vec<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// A persisted automation actor. `id` is the UUID used for every internal
/// reference; `external_id` is platform-specific and only surfaced as
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredAutomation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub platform_connection_id: Uuid,
    pub discovery_run_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub automation_type: AutomationType,
    pub platform_metadata: PlatformMetadata,
    pub detection_metadata: DetectionMetadata,
    pub permissions_required: Vec<String>,
    /// Chronologically ordered, append-only.
    pub risk_score_history: Vec<RiskScoreEntry>,
    pub first_discovered_at: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl DiscoveredAutomation {
    /// Latest risk entry. Every persisted automation has at least the
    /// `initial_discovery` entry.
    pub fn current_risk(&self) -> Option<&RiskScoreEntry> {
        self.risk_score_history.last()
    }

    pub fn current_score(&self) -> u8 {
        self.current_risk().map(|e| e.score).unwrap_or(0)
    }

    pub fn current_level(&self) -> RiskLevel {
        self.current_risk()
            .map(|e| e.level)
            .unwrap_or(RiskLevel::Low)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationSignal {
    AiProvider,
    Timing,
    Behavior,
    DataFlow,
}

impl CorrelationSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationSignal::AiProvider => "ai_provider",
            CorrelationSignal::Timing => "timing",
            CorrelationSignal::Behavior => "behavior",
            CorrelationSignal::DataFlow => "data_flow",
        }
    }
}

impl FromStr for CorrelationSignal {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_provider" => Ok(CorrelationSignal::AiProvider),
            "timing" => Ok(CorrelationSignal::Timing),
            "behavior" => Ok(CorrelationSignal::Behavior),
            "data_flow" => Ok(CorrelationSignal::DataFlow),
            other => Err(crate::Error::validation(format!(
                "unknown correlation signal: {}",
                other
            ))),
        }
    }
}

/// Link between automations on different platforms that share a fingerprint.
/// Automations are referenced by id and resolved through the repository;
/// the link never owns them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationLink {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub fingerprint: String,
    pub automation_ids: Vec<Uuid>,
    pub signals: Vec<CorrelationSignal>,
    pub confidence: f64,
    pub aggregate_risk: u8,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a detector's measured quality at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorBaseline {
    pub id: Uuid,
    pub detector_name: String,
    pub version: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub sample_size: i32,
    /// True when the sample was below the 100-record floor for a primary
    /// baseline. Flagged baselines still participate in drift alerting.
    pub below_sample_floor: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(84), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(85), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_credentials_refresh_margin() {
        let now = Utc::now();

        let fresh = OAuthCredentials {
            access_token: "t".into(),
            refresh_token: None,
            scope: String::new(),
            token_type: "Bearer".into(),
            expires_at: Some(now + Duration::hours(1)),
            platform_specific: serde_json::Value::Null,
        };
        assert!(!fresh.needs_refresh(now));

        let expiring = OAuthCredentials {
            expires_at: Some(now + Duration::minutes(4)),
            ..fresh.clone()
        };
        assert!(expiring.needs_refresh(now));

        let expired = OAuthCredentials {
            expires_at: Some(now - Duration::hours(1)),
            ..fresh.clone()
        };
        assert!(expired.needs_refresh(now));

        let no_expiry = OAuthCredentials {
            expires_at: None,
            ..fresh
        };
        assert!(!no_expiry.needs_refresh(now));
    }

    #[test]
    fn test_platform_metadata_bound() {
        let small = serde_json::json!({"scopes": ["channels:read"]});
        assert!(PlatformMetadata::new(small).is_ok());

        let big = serde_json::json!({
            "blob": "x".repeat(PLATFORM_METADATA_MAX_BYTES + 1)
        });
        assert!(PlatformMetadata::new(big).is_err());
    }

    #[test]
    fn test_platform_metadata_scope_getter() {
        let meta = PlatformMetadata::new(serde_json::json!({
            "scopes": ["https://www.googleapis.com/auth/drive", 42],
            "publisher": "Acme Inc"
        }))
        .unwrap();
        assert_eq!(
            meta.scopes(),
            vec!["https://www.googleapis.com/auth/drive".to_string()]
        );
        assert_eq!(meta.publisher(), Some("Acme Inc"));
        assert_eq!(meta.tenant_id(), None);
    }

    #[test]
    fn test_run_status_terminality() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Partial.is_terminal());
    }

    #[test]
    fn test_enum_round_trips() {
        for s in ["slack", "google", "microsoft"] {
            assert_eq!(PlatformType::from_str(s).unwrap().as_str(), s);
        }
        for s in [
            "initial_discovery",
            "activity_spike",
            "permission_change",
            "detector_update",
            "manual_reassessment",
        ] {
            assert_eq!(RiskTrigger::from_str(s).unwrap().as_str(), s);
        }
        assert!(PlatformType::from_str("github").is_err());
    }
}
