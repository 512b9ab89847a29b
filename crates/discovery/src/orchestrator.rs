//! Discovery orchestrator.
//!
//! Executes one discovery run per `(organization, connection)`: pulls
//! valid credentials through the OAuth lifecycle, drives the platform
//! connector, upserts canonical automation records idempotently, feeds the
//! activity window through the detection pipeline, and appends risk
//! history. Runs move `queued -> running -> {succeeded | partial |
//! failed}`; terminal states are immutable. At most one run per connection
//! executes at a time; cancellation aborts in-flight work and writes no
//! risk history.

use crate::error::{DiscoveryError, Result};
use crate::repository::{
    AutomationRepository, CorrelationRepository, RunRepository, UpsertScope,
};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use singura_core::{
    audit::{AuditLogger, EventType},
    config::{DetectionConfig, DiscoveryConfig},
    events::{RealtimeMessage, RealtimePayload},
    ActivityEvent, DiscoveredAutomation, DiscoveryRun, EventBus, MetricsRegistry,
    PlatformConnection, PlatformType, RiskFactor, RunStatus, Uuid,
};
use singura_detection::{
    CorrelationEngine, CorrelationSubject, DetectionPipeline, DetectorContext, EventWindow,
    RiskScoringEngine,
};
use singura_platforms::{ConnectionRepository, Connector, OAuthLifecycle, PlatformError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct DiscoveryOrchestrator {
    connections: Arc<dyn ConnectionRepository>,
    lifecycle: Arc<OAuthLifecycle>,
    connectors: HashMap<PlatformType, Arc<dyn Connector>>,
    automations: Arc<dyn AutomationRepository>,
    runs: Arc<dyn RunRepository>,
    correlations: Arc<dyn CorrelationRepository>,
    pipeline: Arc<DetectionPipeline>,
    scorer: Arc<RiskScoringEngine>,
    correlator: CorrelationEngine,
    bus: Arc<EventBus>,
    audit: Option<AuditLogger>,
    metrics: Arc<MetricsRegistry>,
    discovery_config: DiscoveryConfig,
    detection_config: DetectionConfig,
    connection_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

#[allow(clippy::too_many_arguments)]
impl DiscoveryOrchestrator {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        lifecycle: Arc<OAuthLifecycle>,
        connectors: HashMap<PlatformType, Arc<dyn Connector>>,
        automations: Arc<dyn AutomationRepository>,
        runs: Arc<dyn RunRepository>,
        correlations: Arc<dyn CorrelationRepository>,
        pipeline: Arc<DetectionPipeline>,
        scorer: Arc<RiskScoringEngine>,
        bus: Arc<EventBus>,
        audit: Option<AuditLogger>,
        metrics: Arc<MetricsRegistry>,
        discovery_config: DiscoveryConfig,
        detection_config: DetectionConfig,
    ) -> Self {
        Self {
            connections,
            lifecycle,
            connectors,
            automations,
            runs,
            correlations,
            pipeline,
            scorer,
            correlator: CorrelationEngine::default(),
            bus,
            audit,
            metrics,
            discovery_config,
            detection_config,
            connection_locks: DashMap::new(),
        }
    }

    /// Execute one discovery run. Fails fast with `RunAlreadyActive` when
    /// the connection already has a run in flight.
    pub async fn run_discovery(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<DiscoveryRun> {
        let lock = self
            .connection_locks
            .entry(connection_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_guard) = lock.try_lock() else {
            return Err(DiscoveryError::RunAlreadyActive(connection_id));
        };

        let run = self.runs.create(organization_id, connection_id).await?;
        self.runs.mark_running(run.id).await?;

        info!(
            run_id = %run.id,
            connection_id = %connection_id,
            "Discovery run started"
        );
        if let Some(audit) = &self.audit {
            let _ = audit
                .log_discovery_run(
                    EventType::DiscoveryRunStarted,
                    organization_id,
                    run.id,
                    format!("discovery run started for connection {}", connection_id),
                    None,
                )
                .await;
        }

        match self.execute(organization_id, connection_id, &run, &cancel).await {
            Ok(outcome) => {
                let status = if outcome.connector_errors == 0 {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Partial
                };
                self.runs
                    .finish(run.id, status, outcome.items_found, outcome.error_summary())
                    .await?;
                self.metrics
                    .discovery_runs
                    .with_label_values(&[status.as_str()])
                    .inc();

                self.emit_progress(
                    organization_id,
                    connection_id,
                    100,
                    status,
                    outcome.items_found.max(0) as u32,
                );
                for discovered in &outcome.newly_discovered {
                    self.bus.publish(RealtimeMessage::new(
                        organization_id,
                        RealtimePayload::AutomationDiscovered {
                            automation_id: discovered.id,
                            name: discovered.name.clone(),
                            platform: outcome.platform,
                            risk_level: discovered.current_level(),
                            detection_metadata: serde_json::to_value(
                                &discovered.detection_metadata,
                            )
                            .ok(),
                        },
                    ));
                }

                if let Some(audit) = &self.audit {
                    let _ = audit
                        .log_discovery_run(
                            EventType::DiscoveryRunCompleted,
                            organization_id,
                            run.id,
                            format!("discovery run finished {}", status.as_str()),
                            Some(outcome.items_found as i64),
                        )
                        .await;
                }

                self.runs
                    .get(run.id)
                    .await?
                    .ok_or(DiscoveryError::RunNotFound(run.id))
            }
            Err(e) => {
                let message = match &e {
                    DiscoveryError::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                warn!(run_id = %run.id, error = %message, "Discovery run failed");

                self.runs
                    .finish(run.id, RunStatus::Failed, 0, Some(message.clone()))
                    .await?;
                self.metrics
                    .discovery_runs
                    .with_label_values(&["failed"])
                    .inc();

                if let Some(audit) = &self.audit {
                    let _ = audit
                        .log_discovery_run(
                            EventType::DiscoveryRunFailed,
                            organization_id,
                            run.id,
                            format!("discovery run failed: {}", message),
                            None,
                        )
                        .await;
                }

                self.runs
                    .get(run.id)
                    .await?
                    .ok_or(DiscoveryError::RunNotFound(run.id))
            }
        }
    }

    async fn execute(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        run: &DiscoveryRun,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        let connection = self
            .connections
            .get(connection_id)
            .await?
            .ok_or(DiscoveryError::ConnectionNotFound(connection_id))?;

        // Missing credentials fail the run with the connection id in the
        // error; nothing partial is persisted.
        let credentials = self
            .lifecycle
            .get_valid(connection_id)
            .await?
            .ok_or(DiscoveryError::CredentialsMissing(connection_id))?;

        let connector = self
            .connectors
            .get(&connection.platform_type)
            .ok_or_else(|| {
                DiscoveryError::NoConnector(connection.platform_type.as_str().to_string())
            })?
            .clone();

        self.emit_progress(organization_id, connection_id, 0, RunStatus::Running, 0);

        let mut connector_errors = 0u32;

        // Enumerate the automation inventory.
        let candidates = match connector.list_automations(&connection, &credentials).await {
            Ok(candidates) => candidates,
            Err(PlatformError::RateLimited { retry_after_seconds }) => {
                // Rate-limit exhaustion leaves the inventory unread; the
                // run still finishes, as partial, with no items.
                warn!(
                    connection_id = %connection_id,
                    retry_after_seconds,
                    "Inventory listing rate limited; finishing run as partial"
                );
                return Ok(RunOutcome {
                    platform: connection.platform_type,
                    items_found: 0,
                    connector_errors: 1,
                    newly_discovered: Vec::new(),
                    errors: vec!["rate limited during automation listing".to_string()],
                });
            }
            Err(e) => return Err(e.into()),
        };

        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        let scope = UpsertScope {
            organization_id,
            platform_connection_id: connection_id,
            discovery_run_id: run.id,
        };

        let mut catalog: Vec<DiscoveredAutomation> = Vec::with_capacity(candidates.len());
        let mut newly_discovered = Vec::new();

        for candidate in &candidates {
            // Checked per candidate: each iteration awaits database round
            // trips, and cancellation must not write further risk history.
            // The upsert and its initial entry stay together so a created
            // row is never left without its history floor.
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }

            let outcome = self.automations.upsert(candidate, scope).await?;
            let mut automation = outcome.automation;

            if outcome.created {
                let entry = RiskScoringEngine::initial_entry(initial_factors(&automation));
                self.automations
                    .append_risk_entry(automation.id, &entry)
                    .await?;
                automation.risk_score_history.push(entry);
                newly_discovered.push(automation.clone());
            }

            catalog.push(automation);
        }

        let items_found = catalog.len() as i32;
        self.emit_progress(organization_id, connection_id, 50, RunStatus::Running, items_found as u32);

        // Activity window: since the last completed run, or the default
        // lookback for first-time connections.
        let until = Utc::now();
        let since = self
            .runs
            .last_finished_at(connection_id)
            .await?
            .unwrap_or(until - Duration::days(self.discovery_config.default_lookback_days));

        let mut events: Vec<ActivityEvent> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        {
            let mut stream = connector.stream_activity(&connection, &credentials, since, until);
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(event)) => events.push(event),
                    Some(Err(e)) => {
                        // Connector trouble mid-stream degrades the run to
                        // partial but keeps what was already ingested.
                        warn!(connection_id = %connection_id, error = %e, "Activity stream error");
                        connector_errors += 1;
                        errors.push(e.to_string());
                        break;
                    }
                    None => break,
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        // Detection over the ingested window.
        let window = EventWindow::new(organization_id, connection_id, since, until, events.clone());
        let context = DetectorContext {
            automations: Arc::new(catalog.clone()),
            config: self.detection_config.clone(),
        };
        let output = self.pipeline.run(window, context).await;

        for (automation_id, factors) in &output.factors_by_automation {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }

            let Some(automation) = catalog.iter().find(|a| a.id == *automation_id) else {
                continue;
            };

            if let Some(entry) = self
                .scorer
                .assess(organization_id, automation, factors.clone())
            {
                self.automations
                    .append_risk_entry(*automation_id, &entry)
                    .await?;
            }
        }

        for unmatched in &output.unmatched {
            // No catalog entry to attach this to yet; the fingerprint shows
            // up for correlation once the actor is enumerated.
            tracing::debug!(
                actor = %unmatched.external_actor_id,
                pattern = unmatched.pattern_type.as_str(),
                "Detection on unenumerated actor"
            );
        }

        self.correlate(organization_id, &connection, &catalog, &events)
            .await?;

        Ok(RunOutcome {
            platform: connection.platform_type,
            items_found,
            connector_errors,
            newly_discovered,
            errors,
        })
    }

    /// Opportunistic correlation across the organization after each run.
    async fn correlate(
        &self,
        organization_id: Uuid,
        connection: &PlatformConnection,
        catalog: &[DiscoveredAutomation],
        events: &[ActivityEvent],
    ) -> Result<()> {
        let mut events_by_actor: HashMap<&str, Vec<ActivityEvent>> = HashMap::new();
        for event in events {
            events_by_actor
                .entry(event.external_actor_id.as_str())
                .or_default()
                .push(event.clone());
        }

        let mut subjects: Vec<CorrelationSubject> = catalog
            .iter()
            .map(|automation| {
                CorrelationSubject::from_automation(
                    automation,
                    connection.platform_type,
                    events_by_actor
                        .remove(automation.external_id.as_str())
                        .unwrap_or_default(),
                )
            })
            .collect();

        // Pull in the rest of the organization so cross-platform pairs are
        // visible from this run.
        for other in self.automations.list_by_organization(organization_id).await? {
            if other.platform_connection_id == connection.id {
                continue;
            }
            let platform = match self.connections.get(other.platform_connection_id).await? {
                Some(other_connection) => other_connection.platform_type,
                None => continue,
            };
            subjects.push(CorrelationSubject::from_automation(&other, platform, Vec::new()));
        }

        let existing = self.correlations.list_by_organization(organization_id).await?;
        for link in self.correlator.correlate(&subjects) {
            let duplicate = existing.iter().any(|known| {
                known.fingerprint == link.fingerprint
                    && known.automation_ids == link.automation_ids
            });
            if duplicate {
                continue;
            }

            info!(
                organization_id = %organization_id,
                automations = link.automation_ids.len(),
                confidence = link.confidence,
                "Correlation link created"
            );
            self.correlations.insert(&link).await?;
        }

        Ok(())
    }

    fn emit_progress(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        progress: u8,
        status: RunStatus,
        items_found: u32,
    ) {
        self.bus.publish(RealtimeMessage::new(
            organization_id,
            RealtimePayload::DiscoveryProgress {
                connection_id,
                progress,
                status,
                items_found,
            },
        ));
    }
}

struct RunOutcome {
    platform: PlatformType,
    items_found: i32,
    connector_errors: u32,
    newly_discovered: Vec<DiscoveredAutomation>,
    errors: Vec<String>,
}

impl RunOutcome {
    fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// Factors for an automation's `initial_discovery` entry, derived from
/// what enumeration alone can see.
fn initial_factors(automation: &DiscoveredAutomation) -> Vec<RiskFactor> {
    let mut factors = vec![RiskFactor::new("new_automation", 10)
        .with_description("first sighting of this automation")];

    if automation.detection_metadata.ai_provider.is_some() {
        factors.push(RiskFactor::new("ai_provider", 20).with_description("talks to an AI vendor"));
    }
    if automation.permissions_required.len() >= 5 {
        factors.push(
            RiskFactor::new("broad_permissions", 15)
                .with_description("holds five or more scopes"),
        );
    }
    if automation.detection_metadata.verified_publisher == Some(true) {
        factors.push(RiskFactor::new("verified_publisher", -30));
    }
    if automation.detection_metadata.well_known_integration == Some(true) {
        factors.push(RiskFactor::new("marketplace_verified", -30));
    }

    factors
}
