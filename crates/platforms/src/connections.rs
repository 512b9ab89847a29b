//! Repository for `platform_connections` rows.

use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use singura_core::{
    ConnectionStatus, PlatformConnection, PlatformMetadata, PlatformType, Uuid,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use tracing::info;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get(&self, connection_id: Uuid) -> Result<Option<PlatformConnection>>;

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<PlatformConnection>>;

    async fn create(&self, connection: &PlatformConnection) -> Result<()>;

    /// Transition the connection status, recording the error detail when the
    /// new status is `error` and clearing it otherwise.
    async fn set_status(
        &self,
        connection_id: Uuid,
        status: ConnectionStatus,
        last_error: Option<String>,
    ) -> Result<()>;

    async fn remove(&self, connection_id: Uuid) -> Result<()>;
}

pub struct PostgresConnectionRepository {
    pool: PgPool,
}

impl PostgresConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<PlatformConnection> {
        let platform_type = PlatformType::from_str(&row.get::<String, _>("platform_type"))
            .map_err(PlatformError::Core)?;
        let status = ConnectionStatus::from_str(&row.get::<String, _>("status"))
            .map_err(PlatformError::Core)?;
        let metadata = PlatformMetadata::new(row.get::<serde_json::Value, _>("metadata"))
            .map_err(PlatformError::Core)?;

        Ok(PlatformConnection {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            platform_type,
            platform_user_id: row.get("platform_user_id"),
            workspace_id: row.get("workspace_id"),
            display_name: row.get("display_name"),
            status,
            last_error: row.get("last_error"),
            metadata,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ConnectionRepository for PostgresConnectionRepository {
    async fn get(&self, connection_id: Uuid) -> Result<Option<PlatformConnection>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, platform_type, platform_user_id, workspace_id,
                   display_name, status, last_error, metadata, created_at, updated_at
            FROM platform_connections
            WHERE id = $1
            "#,
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<PlatformConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, platform_type, platform_user_id, workspace_id,
                   display_name, status, last_error, metadata, created_at, updated_at
            FROM platform_connections
            WHERE organization_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn create(&self, connection: &PlatformConnection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_connections
                (id, organization_id, platform_type, platform_user_id, workspace_id,
                 display_name, status, last_error, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(connection.id)
        .bind(connection.organization_id)
        .bind(connection.platform_type.as_str())
        .bind(&connection.platform_user_id)
        .bind(&connection.workspace_id)
        .bind(&connection.display_name)
        .bind(connection.status.as_str())
        .bind(&connection.last_error)
        .bind(connection.metadata.raw())
        .execute(&self.pool)
        .await?;

        info!(
            connection_id = %connection.id,
            platform = %connection.platform_type,
            "Created platform connection"
        );
        Ok(())
    }

    async fn set_status(
        &self,
        connection_id: Uuid,
        status: ConnectionStatus,
        last_error: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE platform_connections
            SET status = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(connection_id)
        .bind(status.as_str())
        .bind(&last_error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PlatformError::ConnectionNotFound(connection_id));
        }

        info!(
            connection_id = %connection_id,
            status = status.as_str(),
            "Updated connection status"
        );
        Ok(())
    }

    async fn remove(&self, connection_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM platform_connections WHERE id = $1")
            .bind(connection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory repository for tests.
#[derive(Default)]
pub struct InMemoryConnectionRepository {
    entries: dashmap::DashMap<Uuid, PlatformConnection>,
}

impl InMemoryConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: PlatformConnection) {
        self.entries.insert(connection.id, connection);
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    async fn get(&self, connection_id: Uuid) -> Result<Option<PlatformConnection>> {
        Ok(self.entries.get(&connection_id).map(|e| e.clone()))
    }

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<PlatformConnection>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.organization_id == organization_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn create(&self, connection: &PlatformConnection) -> Result<()> {
        self.entries.insert(connection.id, connection.clone());
        Ok(())
    }

    async fn set_status(
        &self,
        connection_id: Uuid,
        status: ConnectionStatus,
        last_error: Option<String>,
    ) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(&connection_id)
            .ok_or(PlatformError::ConnectionNotFound(connection_id))?;
        entry.status = status;
        entry.last_error = last_error;
        entry.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn remove(&self, connection_id: Uuid) -> Result<()> {
        self.entries.remove(&connection_id);
        Ok(())
    }
}
