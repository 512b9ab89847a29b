//! Repositories for discovery runs, automations, risk history, and
//! correlation links.
//!
//! Upserts key on `(organization_id, platform_connection_id, external_id)`
//! and never overwrite `first_discovered_at`; risk history is append-only
//! with per-automation ordering enforced behind a keyed critical section;
//! run rows refuse transitions out of terminal states.

use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use singura_core::{
    AutomationCandidate, CorrelationLink, CorrelationSignal, DetectionMetadata,
    DiscoveredAutomation, DiscoveryRun, PlatformMetadata, RiskFactor, RiskLevel, RiskScoreEntry,
    RiskTrigger, RunStatus, Uuid,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Identity under which a candidate is upserted.
#[derive(Debug, Clone, Copy)]
pub struct UpsertScope {
    pub organization_id: Uuid,
    pub platform_connection_id: Uuid,
    pub discovery_run_id: Uuid,
}

#[derive(Debug)]
pub struct UpsertOutcome {
    pub automation: DiscoveredAutomation,
    pub created: bool,
}

#[async_trait]
pub trait AutomationRepository: Send + Sync {
    /// Insert or update by the compound identity. New rows get
    /// `first_discovered_at = now`; existing rows keep theirs. Risk history
    /// is untouched here; appends go through `append_risk_entry`.
    async fn upsert(&self, candidate: &AutomationCandidate, scope: UpsertScope)
        -> Result<UpsertOutcome>;

    async fn get(&self, automation_id: Uuid) -> Result<Option<DiscoveredAutomation>>;

    async fn list_by_organization(&self, organization_id: Uuid)
        -> Result<Vec<DiscoveredAutomation>>;

    /// Append one entry; rejects timestamps at or before the latest stored
    /// entry so history stays strictly ordered.
    async fn append_risk_entry(&self, automation_id: Uuid, entry: &RiskScoreEntry) -> Result<()>;
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create(&self, organization_id: Uuid, connection_id: Uuid) -> Result<DiscoveryRun>;

    async fn get(&self, run_id: Uuid) -> Result<Option<DiscoveryRun>>;

    /// Move a non-terminal run to `running`.
    async fn mark_running(&self, run_id: Uuid) -> Result<()>;

    /// Move a non-terminal run to a terminal state. Terminal rows are
    /// immutable; a second call fails.
    async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        items_found: i32,
        error: Option<String>,
    ) -> Result<()>;

    /// When the connection last completed a run, for windowing.
    async fn last_finished_at(&self, connection_id: Uuid) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait CorrelationRepository: Send + Sync {
    async fn insert(&self, link: &CorrelationLink) -> Result<()>;

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<CorrelationLink>>;
}

// ---------------------------------------------------------------------------
// Postgres implementations
// ---------------------------------------------------------------------------

pub struct PostgresAutomationRepository {
    pool: PgPool,
    /// Per-automation append serialization.
    append_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl PostgresAutomationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            append_locks: DashMap::new(),
        }
    }

    fn automation_from_row(row: &PgRow, history: Vec<RiskScoreEntry>) -> Result<DiscoveredAutomation> {
        let automation_type =
            singura_core::AutomationType::from_str(&row.get::<String, _>("automation_type"))
                .map_err(DiscoveryError::Core)?;
        let detection_metadata: DetectionMetadata =
            serde_json::from_value(row.get::<serde_json::Value, _>("detection_metadata"))
                .unwrap_or_default();
        let platform_metadata =
            PlatformMetadata::new(row.get::<serde_json::Value, _>("platform_metadata"))
                .map_err(DiscoveryError::Core)?;

        Ok(DiscoveredAutomation {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            platform_connection_id: row.get("platform_connection_id"),
            discovery_run_id: row.get("discovery_run_id"),
            external_id: row.get("external_id"),
            name: row.get("name"),
            description: row.get("description"),
            automation_type,
            platform_metadata,
            detection_metadata,
            permissions_required: row.get("permissions_required"),
            risk_score_history: history,
            first_discovered_at: row.get("first_discovered_at"),
            last_triggered_at: row.get("last_triggered_at"),
        })
    }

    async fn load_history(&self, automation_id: Uuid) -> Result<Vec<RiskScoreEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, score, level, factors, trigger, rapid_change
            FROM risk_score_history
            WHERE automation_id = $1
            ORDER BY timestamp
            "#,
        )
        .bind(automation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let factors: Vec<RiskFactor> =
                serde_json::from_value(row.get::<serde_json::Value, _>("factors"))
                    .unwrap_or_default();
            history.push(RiskScoreEntry {
                timestamp: row.get("timestamp"),
                score: row.get::<i16, _>("score") as u8,
                level: RiskLevel::from_str(&row.get::<String, _>("level"))
                    .map_err(DiscoveryError::Core)?,
                factors,
                trigger: RiskTrigger::from_str(&row.get::<String, _>("trigger"))
                    .map_err(DiscoveryError::Core)?,
                rapid_change: row.get("rapid_change"),
            });
        }
        Ok(history)
    }
}

const AUTOMATION_COLUMNS: &str = r#"
    id, organization_id, platform_connection_id, discovery_run_id, external_id,
    name, description, automation_type, platform_metadata, detection_metadata,
    permissions_required, first_discovered_at, last_triggered_at
"#;

#[async_trait]
impl AutomationRepository for PostgresAutomationRepository {
    async fn upsert(
        &self,
        candidate: &AutomationCandidate,
        scope: UpsertScope,
    ) -> Result<UpsertOutcome> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO discovered_automations
                (organization_id, platform_connection_id, discovery_run_id, external_id,
                 name, description, automation_type, platform_metadata, detection_metadata,
                 permissions_required, last_triggered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (organization_id, platform_connection_id, external_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                platform_metadata = EXCLUDED.platform_metadata,
                detection_metadata = EXCLUDED.detection_metadata,
                permissions_required = EXCLUDED.permissions_required,
                last_triggered_at = COALESCE(EXCLUDED.last_triggered_at, discovered_automations.last_triggered_at),
                updated_at = NOW()
            RETURNING {}, (xmax = 0) AS inserted
            "#,
            AUTOMATION_COLUMNS
        ))
        .bind(scope.organization_id)
        .bind(scope.platform_connection_id)
        .bind(scope.discovery_run_id)
        .bind(&candidate.external_id)
        .bind(&candidate.name)
        .bind(&candidate.description)
        .bind(candidate.automation_type.as_str())
        .bind(candidate.platform_metadata.raw())
        .bind(serde_json::to_value(&candidate.detection_metadata)?)
        .bind(&candidate.permissions_required)
        .bind(candidate.last_triggered_at)
        .fetch_one(&self.pool)
        .await?;

        let created: bool = row.get("inserted");
        let automation_id: Uuid = row.get("id");
        let history = if created {
            Vec::new()
        } else {
            self.load_history(automation_id).await?
        };

        let automation = Self::automation_from_row(&row, history)?;
        debug!(
            automation_id = %automation.id,
            external_id = %candidate.external_id,
            created,
            "Upserted automation"
        );

        Ok(UpsertOutcome { automation, created })
    }

    async fn get(&self, automation_id: Uuid) -> Result<Option<DiscoveredAutomation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM discovered_automations WHERE id = $1",
            AUTOMATION_COLUMNS
        ))
        .bind(automation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let history = self.load_history(automation_id).await?;
        Ok(Some(Self::automation_from_row(&row, history)?))
    }

    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<DiscoveredAutomation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM discovered_automations
            WHERE organization_id = $1
            ORDER BY first_discovered_at
            "#,
            AUTOMATION_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        let mut automations = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get("id");
            let history = self.load_history(id).await?;
            automations.push(Self::automation_from_row(&row, history)?);
        }
        Ok(automations)
    }

    async fn append_risk_entry(&self, automation_id: Uuid, entry: &RiskScoreEntry) -> Result<()> {
        let lock = self
            .append_locks
            .entry(automation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // The guard serializes in-process appenders; the WHERE clause
        // backstops ordering against anything else.
        let result = sqlx::query(
            r#"
            INSERT INTO risk_score_history
                (automation_id, timestamp, score, level, factors, trigger, rapid_change)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE NOT EXISTS (
                SELECT 1 FROM risk_score_history
                WHERE automation_id = $1 AND timestamp >= $2
            )
            "#,
        )
        .bind(automation_id)
        .bind(entry.timestamp)
        .bind(entry.score as i16)
        .bind(entry.level.as_str())
        .bind(serde_json::to_value(&entry.factors)?)
        .bind(entry.trigger.as_str())
        .bind(entry.rapid_change)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DiscoveryError::HistoryOrderViolation(automation_id));
        }

        Ok(())
    }
}

pub struct PostgresRunRepository {
    pool: PgPool,
}

impl PostgresRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn run_from_row(row: &PgRow) -> Result<DiscoveryRun> {
        Ok(DiscoveryRun {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            platform_connection_id: row.get("platform_connection_id"),
            status: RunStatus::from_str(&row.get::<String, _>("status"))
                .map_err(DiscoveryError::Core)?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            items_found: row.get("items_found"),
            error: row.get("error"),
        })
    }
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn create(&self, organization_id: Uuid, connection_id: Uuid) -> Result<DiscoveryRun> {
        let row = sqlx::query(
            r#"
            INSERT INTO discovery_runs (organization_id, platform_connection_id, status)
            VALUES ($1, $2, 'queued')
            RETURNING id, organization_id, platform_connection_id, status,
                      started_at, finished_at, items_found, error
            "#,
        )
        .bind(organization_id)
        .bind(connection_id)
        .fetch_one(&self.pool)
        .await?;

        Self::run_from_row(&row)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<DiscoveryRun>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, platform_connection_id, status,
                   started_at, finished_at, items_found, error
            FROM discovery_runs WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn mark_running(&self, run_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE discovery_runs SET status = 'running' WHERE id = $1 AND status = 'queued'",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DiscoveryError::TerminalStateImmutable(run_id));
        }
        Ok(())
    }

    async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        items_found: i32,
        error: Option<String>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());

        let result = sqlx::query(
            r#"
            UPDATE discovery_runs
            SET status = $2, items_found = $3, error = $4, finished_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(items_found)
        .bind(&error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DiscoveryError::TerminalStateImmutable(run_id));
        }

        info!(run_id = %run_id, status = status.as_str(), items_found, "Discovery run finished");
        Ok(())
    }

    async fn last_finished_at(&self, connection_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let finished: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(finished_at) FROM discovery_runs
            WHERE platform_connection_id = $1 AND status IN ('succeeded', 'partial')
            "#,
        )
        .bind(connection_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(finished)
    }
}

pub struct PostgresCorrelationRepository {
    pool: PgPool,
}

impl PostgresCorrelationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CorrelationRepository for PostgresCorrelationRepository {
    async fn insert(&self, link: &CorrelationLink) -> Result<()> {
        let signals: Vec<&str> = link.signals.iter().map(|s| s.as_str()).collect();

        sqlx::query(
            r#"
            INSERT INTO correlation_links
                (id, organization_id, fingerprint, automation_ids, signals, confidence, aggregate_risk)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(link.id)
        .bind(link.organization_id)
        .bind(&link.fingerprint)
        .bind(&link.automation_ids)
        .bind(&signals.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .bind(link.confidence)
        .bind(link.aggregate_risk as i16)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<CorrelationLink>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, fingerprint, automation_ids, signals,
                   confidence, aggregate_risk, created_at
            FROM correlation_links
            WHERE organization_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        let mut links = Vec::with_capacity(rows.len());
        for row in rows {
            let signals: Vec<String> = row.get("signals");
            let signals = signals
                .iter()
                .map(|s| CorrelationSignal::from_str(s).map_err(DiscoveryError::Core))
                .collect::<Result<Vec<_>>>()?;

            links.push(CorrelationLink {
                id: row.get("id"),
                organization_id: row.get("organization_id"),
                fingerprint: row.get("fingerprint"),
                automation_ids: row.get("automation_ids"),
                signals,
                confidence: row.get("confidence"),
                aggregate_risk: row.get::<i16, _>("aggregate_risk") as u8,
                created_at: row.get("created_at"),
            });
        }
        Ok(links)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations for tests
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryAutomationRepository {
    entries: DashMap<Uuid, DiscoveredAutomation>,
}

impl InMemoryAutomationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AutomationRepository for InMemoryAutomationRepository {
    async fn upsert(
        &self,
        candidate: &AutomationCandidate,
        scope: UpsertScope,
    ) -> Result<UpsertOutcome> {
        let existing_id = self.entries.iter().find_map(|entry| {
            (entry.organization_id == scope.organization_id
                && entry.platform_connection_id == scope.platform_connection_id
                && entry.external_id == candidate.external_id)
                .then_some(entry.id)
        });

        if let Some(id) = existing_id {
            let mut entry = self.entries.get_mut(&id).unwrap();
            entry.name = candidate.name.clone();
            entry.description = candidate.description.clone();
            entry.platform_metadata = candidate.platform_metadata.clone();
            entry.detection_metadata = candidate.detection_metadata.clone();
            entry.permissions_required = candidate.permissions_required.clone();
            if candidate.last_triggered_at.is_some() {
                entry.last_triggered_at = candidate.last_triggered_at;
            }
            return Ok(UpsertOutcome {
                automation: entry.clone(),
                created: false,
            });
        }

        let automation = DiscoveredAutomation {
            id: Uuid::new_v4(),
            organization_id: scope.organization_id,
            platform_connection_id: scope.platform_connection_id,
            discovery_run_id: scope.discovery_run_id,
            external_id: candidate.external_id.clone(),
            name: candidate.name.clone(),
            description: candidate.description.clone(),
            automation_type: candidate.automation_type,
            platform_metadata: candidate.platform_metadata.clone(),
            detection_metadata: candidate.detection_metadata.clone(),
            permissions_required: candidate.permissions_required.clone(),
            risk_score_history: Vec::new(),
            first_discovered_at: Utc::now(),
            last_triggered_at: candidate.last_triggered_at,
        };
        self.entries.insert(automation.id, automation.clone());

        Ok(UpsertOutcome {
            automation,
            created: true,
        })
    }

    async fn get(&self, automation_id: Uuid) -> Result<Option<DiscoveredAutomation>> {
        Ok(self.entries.get(&automation_id).map(|e| e.clone()))
    }

    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<DiscoveredAutomation>> {
        let mut automations: Vec<DiscoveredAutomation> = self
            .entries
            .iter()
            .filter(|e| e.organization_id == organization_id)
            .map(|e| e.clone())
            .collect();
        automations.sort_by_key(|a| a.first_discovered_at);
        Ok(automations)
    }

    async fn append_risk_entry(&self, automation_id: Uuid, entry: &RiskScoreEntry) -> Result<()> {
        let mut automation = self
            .entries
            .get_mut(&automation_id)
            .ok_or(DiscoveryError::AutomationNotFound(automation_id))?;

        if let Some(last) = automation.risk_score_history.last() {
            if entry.timestamp <= last.timestamp {
                return Err(DiscoveryError::HistoryOrderViolation(automation_id));
            }
        }
        automation.risk_score_history.push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    entries: DashMap<Uuid, DiscoveryRun>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create(&self, organization_id: Uuid, connection_id: Uuid) -> Result<DiscoveryRun> {
        let run = DiscoveryRun {
            id: Uuid::new_v4(),
            organization_id,
            platform_connection_id: connection_id,
            status: RunStatus::Queued,
            started_at: Utc::now(),
            finished_at: None,
            items_found: 0,
            error: None,
        };
        self.entries.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<DiscoveryRun>> {
        Ok(self.entries.get(&run_id).map(|e| e.clone()))
    }

    async fn mark_running(&self, run_id: Uuid) -> Result<()> {
        let mut run = self
            .entries
            .get_mut(&run_id)
            .ok_or(DiscoveryError::RunNotFound(run_id))?;
        if run.status != RunStatus::Queued {
            return Err(DiscoveryError::TerminalStateImmutable(run_id));
        }
        run.status = RunStatus::Running;
        Ok(())
    }

    async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        items_found: i32,
        error: Option<String>,
    ) -> Result<()> {
        let mut run = self
            .entries
            .get_mut(&run_id)
            .ok_or(DiscoveryError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Err(DiscoveryError::TerminalStateImmutable(run_id));
        }
        run.status = status;
        run.items_found = items_found;
        run.error = error;
        run.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn last_finished_at(&self, connection_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .entries
            .iter()
            .filter(|r| {
                r.platform_connection_id == connection_id
                    && matches!(r.status, RunStatus::Succeeded | RunStatus::Partial)
            })
            .filter_map(|r| r.finished_at)
            .max())
    }
}

#[derive(Default)]
pub struct InMemoryCorrelationRepository {
    entries: DashMap<Uuid, CorrelationLink>,
}

impl InMemoryCorrelationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationRepository for InMemoryCorrelationRepository {
    async fn insert(&self, link: &CorrelationLink) -> Result<()> {
        self.entries.insert(link.id, link.clone());
        Ok(())
    }

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<CorrelationLink>> {
        Ok(self
            .entries
            .iter()
            .filter(|l| l.organization_id == organization_id)
            .map(|l| l.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use singura_core::AutomationType;

    fn candidate(external_id: &str) -> AutomationCandidate {
        AutomationCandidate {
            external_id: external_id.to_string(),
            name: format!("automation {}", external_id),
            description: None,
            automation_type: AutomationType::Bot,
            platform_metadata: PlatformMetadata::empty(),
            detection_metadata: DetectionMetadata::default(),
            permissions_required: Vec::new(),
            last_triggered_at: None,
        }
    }

    fn scope() -> UpsertScope {
        UpsertScope {
            organization_id: Uuid::new_v4(),
            platform_connection_id: Uuid::new_v4(),
            discovery_run_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_upsert_idempotent_and_preserves_first_discovered() {
        let repository = InMemoryAutomationRepository::new();
        let scope = scope();

        let first = repository.upsert(&candidate("ext-1"), scope).await.unwrap();
        assert!(first.created);

        let mut renamed = candidate("ext-1");
        renamed.name = "renamed".to_string();
        let second = repository.upsert(&renamed, scope).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.automation.id, first.automation.id);
        assert_eq!(second.automation.name, "renamed");
        assert_eq!(
            second.automation.first_discovered_at,
            first.automation.first_discovered_at
        );
    }

    #[tokio::test]
    async fn test_risk_history_append_is_ordered() {
        let repository = InMemoryAutomationRepository::new();
        let outcome = repository.upsert(&candidate("ext-2"), scope()).await.unwrap();
        let id = outcome.automation.id;

        let base = Utc::now();
        let entry = |offset: i64, score: u8| RiskScoreEntry {
            timestamp: base + chrono::Duration::seconds(offset),
            score,
            level: RiskLevel::from_score(score),
            factors: Vec::new(),
            trigger: RiskTrigger::DetectorUpdate,
            rapid_change: false,
        };

        repository.append_risk_entry(id, &entry(0, 10)).await.unwrap();
        repository.append_risk_entry(id, &entry(10, 20)).await.unwrap();

        // Out-of-order append is refused.
        let stale = repository.append_risk_entry(id, &entry(5, 30)).await;
        assert!(matches!(
            stale,
            Err(DiscoveryError::HistoryOrderViolation(_))
        ));

        let stored = repository.get(id).await.unwrap().unwrap();
        assert_eq!(stored.risk_score_history.len(), 2);
        assert!(stored.risk_score_history[0].timestamp < stored.risk_score_history[1].timestamp);
    }

    #[tokio::test]
    async fn test_terminal_run_states_immutable() {
        let repository = InMemoryRunRepository::new();
        let run = repository
            .create(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        repository.mark_running(run.id).await.unwrap();
        repository
            .finish(run.id, RunStatus::Succeeded, 5, None)
            .await
            .unwrap();

        let again = repository
            .finish(run.id, RunStatus::Failed, 0, Some("late".into()))
            .await;
        assert!(matches!(
            again,
            Err(DiscoveryError::TerminalStateImmutable(_))
        ));

        let stored = repository.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.items_found, 5);
    }
}
