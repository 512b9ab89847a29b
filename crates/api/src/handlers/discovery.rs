//! Discovery run status handlers.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, Router},
};
use serde::Deserialize;
use serde_json::{json, Value};
use singura_core::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrganizationScope {
    pub organization_id: Uuid,
}

pub fn discovery_routes() -> Router<AppState> {
    Router::new()
        .route("/runs/:id", get(get_run))
        .route("/correlations", get(list_correlations))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .runs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("discovery run not found"))?;

    Ok(Json(json!({
        "id": run.id,
        "organization_id": run.organization_id,
        "connection_id": run.platform_connection_id,
        "status": run.status,
        "started_at": run.started_at,
        "finished_at": run.finished_at,
        "items_found": run.items_found,
        "error": run.error,
    })))
}

async fn list_correlations(
    State(state): State<AppState>,
    Query(scope): Query<OrganizationScope>,
) -> Result<Json<Value>, ApiError> {
    let links = state
        .correlations
        .list_by_organization(scope.organization_id)
        .await?;

    let total = links.len();
    Ok(Json(json!({
        "correlations": links,
        "total": total,
    })))
}
