//! Platform connection handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, Router},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use singura_core::{
    audit::EventType, ConnectionStatus, OAuthCredentials, PlatformConnection, PlatformMetadata,
    PlatformType, Uuid,
};
use singura_discovery::RunRequest;
use validator::Validate;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrganizationScope {
    pub organization_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateConnectionRequest {
    pub organization_id: Uuid,
    pub platform_type: PlatformType,
    #[validate(length(min = 1, max = 255))]
    pub platform_user_id: String,
    pub workspace_id: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub display_name: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Credentials from the OAuth callback; stored encrypted, never echoed.
    pub credentials: OAuthCredentials,
}

pub fn connection_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_connections))
        .route("/", post(create_connection))
        .route("/:id", delete(remove_connection))
        .route("/:id/discover", post(trigger_discovery))
}

fn connection_json(connection: &PlatformConnection) -> Value {
    json!({
        "id": connection.id,
        "organization_id": connection.organization_id,
        "platform_type": connection.platform_type,
        "platform_user_id": connection.platform_user_id,
        "workspace_id": connection.workspace_id,
        "display_name": connection.display_name,
        "status": connection.status,
        "last_error": connection.last_error,
        "created_at": connection.created_at,
        "updated_at": connection.updated_at,
    })
}

async fn list_connections(
    State(state): State<AppState>,
    Query(scope): Query<OrganizationScope>,
) -> Result<Json<Value>, ApiError> {
    let connections = state
        .connections
        .list_by_organization(scope.organization_id)
        .await?;

    Ok(Json(json!({
        "connections": connections.iter().map(connection_json).collect::<Vec<_>>(),
        "total": connections.len(),
    })))
}

async fn create_connection(
    State(state): State<AppState>,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Err(e) = request.validate() {
        return Err(ApiError::bad_request(e.to_string()));
    }

    // Connection quota and tenancy check.
    let quota = sqlx::query_as::<_, (i32, i64)>(
        r#"
        SELECT o.max_connections,
               (SELECT COUNT(*) FROM platform_connections pc WHERE pc.organization_id = o.id)
        FROM organizations o
        WHERE o.id = $1
        "#,
    )
    .bind(request.organization_id)
    .fetch_optional(state.db.get())
    .await?;

    let Some((max_connections, existing)) = quota else {
        return Err(ApiError::not_found("organization not found"));
    };
    if existing >= max_connections as i64 {
        return Err(ApiError::conflict(format!(
            "organization connection limit reached ({})",
            max_connections
        )));
    }

    let metadata = PlatformMetadata::new(request.metadata).map_err(ApiError::from)?;
    let connection = PlatformConnection {
        id: Uuid::new_v4(),
        organization_id: request.organization_id,
        platform_type: request.platform_type,
        platform_user_id: request.platform_user_id,
        workspace_id: request.workspace_id,
        display_name: request.display_name,
        status: ConnectionStatus::Active,
        last_error: None,
        metadata,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    state.connections.create(&connection).await?;
    state
        .credentials
        .store(connection.id, &request.credentials)
        .await?;

    let _ = state
        .audit
        .log_event(
            singura_core::AuditEvent::builder(
                EventType::ConnectionCreated,
                format!(
                    "connected {} workspace '{}'",
                    connection.platform_type, connection.display_name
                ),
            )
            .organization(connection.organization_id)
            .resource("platform_connection", connection.id.to_string())
            .build(),
        )
        .await;

    Ok((StatusCode::CREATED, Json(connection_json(&connection))))
}

async fn remove_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let connection = state
        .connections
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("connection not found"))?;

    // Best-effort upstream revocation; local deletion always proceeds.
    state.lifecycle.revoke(id).await?;
    state.connections.remove(id).await?;

    let _ = state
        .audit
        .log_event(
            singura_core::AuditEvent::builder(
                EventType::ConnectionRemoved,
                format!("removed connection '{}'", connection.display_name),
            )
            .organization(connection.organization_id)
            .resource("platform_connection", id.to_string())
            .build(),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Enqueue a discovery run for the connection. The worker pool picks the
/// request up; progress streams over the realtime channel.
async fn trigger_discovery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let connection = state
        .connections
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("connection not found"))?;

    let request = RunRequest::new(connection.organization_id, id);
    state.run_queue.enqueue(&request).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to enqueue discovery run");
        ApiError::conflict("failed to enqueue discovery run")
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "connection_id": id,
            "organization_id": connection.organization_id,
            "queued_at": request.requested_at,
        })),
    ))
}
