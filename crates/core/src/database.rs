//! Database pool management and the startup schema verifier.
//!
//! All tables live in one schema and every row is organization-scoped; the
//! pool is shared by every repository through [`DatabasePool`]. After
//! migrations run, [`DatabasePool::verify_schema`] asserts the presence of
//! the tables and columns the application writes to, in particular that
//! `audit_logs` carries BOTH `timestamp` (event time) and `created_at`
//! (row insertion time), and aborts startup with a remediation hint when
//! anything is missing.

use crate::{config::DatabaseConfig, error::Result, Error};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::info;

/// Tables the application reads and writes. Checked at startup.
const REQUIRED_TABLES: &[&str] = &[
    "organizations",
    "platform_connections",
    "encrypted_credentials",
    "discovery_runs",
    "discovered_automations",
    "risk_score_history",
    "correlation_links",
    "detector_baselines",
    "audit_logs",
    "oauth_scope_library",
];

/// Columns that must both exist on `audit_logs`; conflating event time with
/// row time is a schema error.
const AUDIT_LOG_REQUIRED_COLUMNS: &[&str] = &[
    "id",
    "organization_id",
    "action",
    "timestamp",
    "created_at",
    "details",
];

#[derive(Clone)]
pub struct DatabasePool {
    pub pool: PgPool,
}

impl DatabasePool {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        info!("Initializing database pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        info!("Database pool initialized successfully");

        Ok(Self { pool })
    }

    pub fn get(&self) -> &PgPool {
        &self.pool
    }

    pub async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    /// Asserts the presence of required tables and audit-log columns.
    /// Called once at startup, after migrations; a missing piece aborts the
    /// process with a descriptive [`crate::ErrorCode::MigrationMissing`].
    pub async fn verify_schema(&self) -> Result<()> {
        let rows = sqlx::query(
            r#"
            SELECT table_name FROM information_schema.tables
            WHERE table_schema = 'public' AND table_name = ANY($1)
            "#,
        )
        .bind(REQUIRED_TABLES)
        .fetch_all(&self.pool)
        .await?;

        let present: Vec<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("table_name"))
            .collect();

        for table in REQUIRED_TABLES {
            if !present.iter().any(|t| t == table) {
                return Err(Error::migration_missing(format!(
                    "required table '{}' is missing; run `sqlx migrate run` against this database before starting",
                    table
                )));
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT column_name FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = 'audit_logs'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let columns: Vec<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("column_name"))
            .collect();

        for column in AUDIT_LOG_REQUIRED_COLUMNS {
            if !columns.iter().any(|c| c == column) {
                return Err(Error::migration_missing(format!(
                    "audit_logs is missing required column '{}'; event time ('timestamp') and row time ('created_at') are distinct, required columns; apply the initial schema migration",
                    column
                )));
            }
        }

        info!("Schema verification passed");
        Ok(())
    }
}
