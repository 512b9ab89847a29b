//! Discovery orchestrator behavior with an in-memory backing store and a
//! scripted connector: idempotent replays, per-connection exclusivity,
//! cancellation, and partial-run classification.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use singura_core::{
    config::{DetectionConfig, DiscoveryConfig, OAuthClientConfig, OAuthConfig},
    ActionType, ActivityEvent, AutomationCandidate, AutomationType, ConnectionStatus,
    DetectionMetadata, DiscoveredAutomation, EventBus, MetricsRegistry, OAuthCredentials,
    PlatformConnection, PlatformMetadata, PlatformType, RiskScoreEntry, RiskTrigger, RunStatus,
    Uuid,
};
use singura_detection::{DetectionPipeline, RiskScoringEngine};
use singura_discovery::{
    AutomationRepository, DiscoveryError, DiscoveryOrchestrator, InMemoryAutomationRepository,
    InMemoryCorrelationRepository, InMemoryRunRepository, UpsertOutcome, UpsertScope,
};
use singura_platforms::{
    connections::InMemoryConnectionRepository, credentials::InMemoryCredentialStore,
    ActivityStream, Connector, CredentialStore, OAuthLifecycle, PlatformError,
    TokenRefreshClient,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Connector scripted with a fixed inventory and activity window.
struct ScriptedConnector {
    candidates: Vec<AutomationCandidate>,
    events: Vec<ActivityEvent>,
    list_delay_ms: u64,
    fail_stream: bool,
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn platform(&self) -> PlatformType {
        PlatformType::Slack
    }

    async fn list_automations(
        &self,
        _connection: &PlatformConnection,
        _credentials: &OAuthCredentials,
    ) -> singura_platforms::Result<Vec<AutomationCandidate>> {
        if self.list_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.list_delay_ms)).await;
        }
        Ok(self.candidates.clone())
    }

    fn stream_activity(
        &self,
        _connection: &PlatformConnection,
        _credentials: &OAuthCredentials,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> ActivityStream {
        let events = self.events.clone();
        let fail = self.fail_stream;
        Box::pin(futures::stream::iter(
            events
                .into_iter()
                .map(Ok)
                .chain(fail.then(|| {
                    Err(PlatformError::Unavailable("stream interrupted".to_string()))
                }))
                .collect::<Vec<_>>(),
        ))
    }
}

/// Delegates to the backing store and fires the cancellation token after
/// the first risk-history append, so a cancel lands between two candidate
/// upserts.
struct CancelAfterFirstAppend {
    inner: Arc<InMemoryAutomationRepository>,
    cancel: CancellationToken,
}

#[async_trait]
impl AutomationRepository for CancelAfterFirstAppend {
    async fn upsert(
        &self,
        candidate: &AutomationCandidate,
        scope: UpsertScope,
    ) -> singura_discovery::Result<UpsertOutcome> {
        self.inner.upsert(candidate, scope).await
    }

    async fn get(
        &self,
        automation_id: Uuid,
    ) -> singura_discovery::Result<Option<DiscoveredAutomation>> {
        self.inner.get(automation_id).await
    }

    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> singura_discovery::Result<Vec<DiscoveredAutomation>> {
        self.inner.list_by_organization(organization_id).await
    }

    async fn append_risk_entry(
        &self,
        automation_id: Uuid,
        entry: &RiskScoreEntry,
    ) -> singura_discovery::Result<()> {
        let result = self.inner.append_risk_entry(automation_id, entry).await;
        self.cancel.cancel();
        result
    }
}

struct Harness {
    orchestrator: Arc<DiscoveryOrchestrator>,
    automations: Arc<InMemoryAutomationRepository>,
    connections: Arc<InMemoryConnectionRepository>,
    organization_id: Uuid,
    connection_id: Uuid,
}

fn bot_candidate() -> AutomationCandidate {
    AutomationCandidate {
        external_id: "B123".to_string(),
        name: "Nightly Sync Bot".to_string(),
        description: None,
        automation_type: AutomationType::Bot,
        platform_metadata: PlatformMetadata::empty(),
        detection_metadata: DetectionMetadata::default(),
        permissions_required: vec!["files:read".to_string()],
        last_triggered_at: None,
    }
}

fn rapid_events(actor: &str) -> Vec<ActivityEvent> {
    let start = Utc::now() - Duration::minutes(30);
    (0..30)
        .map(|i| ActivityEvent {
            external_actor_id: actor.to_string(),
            action_type: ActionType::FileEdit,
            timestamp: start + Duration::milliseconds(i * 100),
            resource: Some(format!("file-{}", i)),
            scope_hints: Vec::new(),
            payload_bytes: None,
        })
        .collect()
}

fn discovery_config() -> DiscoveryConfig {
    DiscoveryConfig {
        worker_pool_size: 2,
        default_lookback_days: 7,
        max_refresh_retries: 1,
        run_queue: "singura:test".to_string(),
    }
}

fn detection_config() -> DetectionConfig {
    DetectionConfig {
        velocity_events_per_second: 2.0,
        batch_min_actions: 10,
        batch_window_seconds: 60,
        interval_variance_threshold: 0.15,
        off_hours_start: 20,
        off_hours_end: 6,
        data_volume_baseline_bytes: 50 * 1024 * 1024,
    }
}

async fn harness(connector: ScriptedConnector, namespace: &str) -> Harness {
    let automations = Arc::new(InMemoryAutomationRepository::new());
    harness_with_automations(connector, namespace, automations.clone(), automations).await
}

/// Build the harness with a distinct repository handed to the orchestrator,
/// so tests can interpose on the write path while asserting against the
/// backing store.
async fn harness_with_automations(
    connector: ScriptedConnector,
    namespace: &str,
    automations: Arc<InMemoryAutomationRepository>,
    orchestrator_automations: Arc<dyn AutomationRepository>,
) -> Harness {
    let metrics = Arc::new(MetricsRegistry::new(namespace).unwrap());
    let bus = Arc::new(EventBus::new(1024, metrics.clone()));

    let organization_id = Uuid::new_v4();
    let connection_id = Uuid::new_v4();

    let connections = Arc::new(InMemoryConnectionRepository::new());
    connections.insert(PlatformConnection {
        id: connection_id,
        organization_id,
        platform_type: PlatformType::Slack,
        platform_user_id: "W123".to_string(),
        workspace_id: Some("T999".to_string()),
        display_name: "Slack Workspace".to_string(),
        status: ConnectionStatus::Active,
        last_error: None,
        metadata: PlatformMetadata::empty(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });

    let store = Arc::new(InMemoryCredentialStore::new());
    store
        .store(
            connection_id,
            &OAuthCredentials {
                access_token: "xoxb-valid".to_string(),
                refresh_token: Some("R".to_string()),
                scope: "admin".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: Some(Utc::now() + Duration::hours(2)),
                platform_specific: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();

    let oauth_client = OAuthClientConfig {
        client_id: "unused".to_string(),
        client_secret: "unused".to_string(),
        token_endpoint: "http://127.0.0.1:1/token".to_string(),
        revoke_endpoint: None,
    };
    let refresh_client = Arc::new(TokenRefreshClient::new(
        OAuthConfig {
            google: oauth_client.clone(),
            slack: oauth_client.clone(),
            microsoft: oauth_client,
        },
        metrics.clone(),
        1,
    ));
    let lifecycle = Arc::new(OAuthLifecycle::new(
        store,
        connections.clone(),
        refresh_client,
        bus.clone(),
        None,
    ));

    let runs = Arc::new(InMemoryRunRepository::new());
    let correlations = Arc::new(InMemoryCorrelationRepository::new());
    let pipeline = Arc::new(DetectionPipeline::with_defaults(metrics.clone()));
    let scorer = Arc::new(RiskScoringEngine::new(bus.clone()));

    let mut connectors: HashMap<PlatformType, Arc<dyn Connector>> = HashMap::new();
    connectors.insert(PlatformType::Slack, Arc::new(connector));

    let orchestrator = Arc::new(DiscoveryOrchestrator::new(
        connections.clone(),
        lifecycle,
        connectors,
        orchestrator_automations,
        runs,
        correlations,
        pipeline,
        scorer,
        bus,
        None,
        metrics,
        discovery_config(),
        detection_config(),
    ));

    Harness {
        orchestrator,
        automations,
        connections,
        organization_id,
        connection_id,
    }
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let h = harness(
        ScriptedConnector {
            candidates: vec![bot_candidate()],
            events: rapid_events("B123"),
            list_delay_ms: 0,
            fail_stream: false,
        },
        "singura_t_idempotent",
    )
    .await;

    let first = h
        .orchestrator
        .run_discovery(h.organization_id, h.connection_id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(first.items_found, 1);

    let after_first = h
        .automations
        .list_by_organization(h.organization_id)
        .await
        .unwrap();
    assert_eq!(after_first.len(), 1);
    let automation = &after_first[0];
    let first_discovered_at = automation.first_discovered_at;
    let history_len = automation.risk_score_history.len();

    // The floor entry is initial_discovery; detection appended on top.
    assert_eq!(
        automation.risk_score_history[0].trigger,
        RiskTrigger::InitialDiscovery
    );
    assert!(history_len >= 2);

    // Replay on unchanged upstream state.
    let second = h
        .orchestrator
        .run_discovery(h.organization_id, h.connection_id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);

    let after_second = h
        .automations
        .list_by_organization(h.organization_id)
        .await
        .unwrap();
    assert_eq!(after_second.len(), 1, "no duplicate automations");

    let replayed = &after_second[0];
    assert_eq!(replayed.first_discovered_at, first_discovered_at);
    assert_eq!(
        replayed
            .risk_score_history
            .iter()
            .filter(|e| e.trigger == RiskTrigger::InitialDiscovery)
            .count(),
        1,
        "no duplicate initial_discovery entries"
    );
    assert_eq!(
        replayed.risk_score_history.len(),
        history_len,
        "unchanged data appends nothing"
    );
}

#[tokio::test]
async fn test_concurrent_runs_on_one_connection_rejected() {
    let h = harness(
        ScriptedConnector {
            candidates: vec![bot_candidate()],
            events: Vec::new(),
            list_delay_ms: 200,
            fail_stream: false,
        },
        "singura_t_exclusive",
    )
    .await;

    let first = {
        let orchestrator = h.orchestrator.clone();
        let organization_id = h.organization_id;
        let connection_id = h.connection_id;
        tokio::spawn(async move {
            orchestrator
                .run_discovery(organization_id, connection_id, CancellationToken::new())
                .await
        })
    };

    // Give the first run time to take the connection lock.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let second = h
        .orchestrator
        .run_discovery(h.organization_id, h.connection_id, CancellationToken::new())
        .await;
    assert!(matches!(second, Err(DiscoveryError::RunAlreadyActive(_))));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_cancellation_fails_run_without_risk_writes() {
    let h = harness(
        ScriptedConnector {
            candidates: vec![bot_candidate()],
            events: rapid_events("B123"),
            list_delay_ms: 0,
            fail_stream: false,
        },
        "singura_t_cancel",
    )
    .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = h
        .orchestrator
        .run_discovery(h.organization_id, h.connection_id, cancel)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("cancelled"));

    let automations = h
        .automations
        .list_by_organization(h.organization_id)
        .await
        .unwrap();
    assert!(automations.is_empty(), "no partial state persisted");
}

#[tokio::test]
async fn test_cancel_between_upserts_stops_risk_writes() {
    // Two candidates; the cancel fires right after the first one's initial
    // entry lands, so the second iteration must observe it and abort
    // before touching the store again.
    let mut second = bot_candidate();
    second.external_id = "B456".to_string();
    second.name = "Weekly Digest Bot".to_string();

    let inner = Arc::new(InMemoryAutomationRepository::new());
    let cancel = CancellationToken::new();
    let wrapper = Arc::new(CancelAfterFirstAppend {
        inner: inner.clone(),
        cancel: cancel.clone(),
    });

    let h = harness_with_automations(
        ScriptedConnector {
            candidates: vec![bot_candidate(), second],
            events: rapid_events("B123"),
            list_delay_ms: 0,
            fail_stream: false,
        },
        "singura_t_midcancel",
        inner,
        wrapper,
    )
    .await;

    let run = h
        .orchestrator
        .run_discovery(h.organization_id, h.connection_id, cancel)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("cancelled"));

    let automations = h
        .automations
        .list_by_organization(h.organization_id)
        .await
        .unwrap();

    // The first candidate is a complete unit (row plus its initial entry);
    // the second never landed, and no detection-driven history was written.
    assert_eq!(automations.len(), 1);
    assert_eq!(automations[0].external_id, "B123");
    assert_eq!(automations[0].risk_score_history.len(), 1);
    assert_eq!(
        automations[0].risk_score_history[0].trigger,
        RiskTrigger::InitialDiscovery
    );
}

#[tokio::test]
async fn test_stream_error_finishes_partial() {
    let h = harness(
        ScriptedConnector {
            candidates: vec![bot_candidate()],
            events: rapid_events("B123"),
            list_delay_ms: 0,
            fail_stream: true,
        },
        "singura_t_partial",
    )
    .await;

    let run = h
        .orchestrator
        .run_discovery(h.organization_id, h.connection_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(run.items_found, 1);
    assert!(run.error.unwrap().contains("stream interrupted"));
}

#[tokio::test]
async fn test_missing_credentials_fails_with_connection_id() {
    let h = harness(
        ScriptedConnector {
            candidates: Vec::new(),
            events: Vec::new(),
            list_delay_ms: 0,
            fail_stream: false,
        },
        "singura_t_nocreds",
    )
    .await;

    // A second connection that exists but has no stored credentials.
    let orphan_connection = Uuid::new_v4();
    h.connections.insert(PlatformConnection {
        id: orphan_connection,
        organization_id: h.organization_id,
        platform_type: PlatformType::Slack,
        platform_user_id: "W456".to_string(),
        workspace_id: None,
        display_name: "Unlinked Workspace".to_string(),
        status: ConnectionStatus::Active,
        last_error: None,
        metadata: PlatformMetadata::empty(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });

    let run = h
        .orchestrator
        .run_discovery(h.organization_id, orphan_connection, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.unwrap();
    assert!(error.contains("credentials"), "{}", error);
    assert!(error.contains(&orphan_connection.to_string()), "{}", error);
}
