use singura_core::{AuditLogger, Config, DatabasePool, EventBus, MetricsRegistry};
use singura_detection::RiskScoringEngine;
use singura_discovery::{
    AutomationRepository, CorrelationRepository, DiscoveryOrchestrator, RedisRunQueue,
    RunRepository,
};
use singura_platforms::{ConnectionRepository, CredentialStore, OAuthLifecycle};
use std::sync::Arc;

use crate::scope_library::ScopeLibrary;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: DatabasePool,
    pub redis: redis::aio::ConnectionManager,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<MetricsRegistry>,
    pub audit: AuditLogger,
    pub connections: Arc<dyn ConnectionRepository>,
    pub credentials: Arc<dyn CredentialStore>,
    pub automations: Arc<dyn AutomationRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub correlations: Arc<dyn CorrelationRepository>,
    pub lifecycle: Arc<OAuthLifecycle>,
    pub scorer: Arc<RiskScoringEngine>,
    pub orchestrator: Arc<DiscoveryOrchestrator>,
    pub run_queue: Arc<RedisRunQueue>,
    pub scope_library: Arc<ScopeLibrary>,
}
