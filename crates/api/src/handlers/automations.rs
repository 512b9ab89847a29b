//! Automation inventory handlers.
//!
//! `id` in every route is the internal UUID; platform-specific external
//! ids only appear nested under metadata. Hitting the details route with
//! anything that does not parse as a UUID is a 404, never a fallback
//! lookup by external id.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, Router},
};
use serde::Deserialize;
use serde_json::{json, Value};
use singura_core::{DiscoveredAutomation, RiskFactor, Uuid};
use singura_detection::risk::history;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrganizationScope {
    pub organization_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ReassessRequest {
    /// Complete replacement factor set; the score is recomputed from it.
    pub factors: Vec<ReassessFactor>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReassessFactor {
    #[serde(rename = "type")]
    pub factor_type: String,
    pub score: i32,
    pub description: Option<String>,
}

pub fn automation_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_automations))
        .route("/:id/details", get(automation_details))
        .route("/:id/reassess", post(reassess_automation))
}

/// Routes take the internal UUID only. A platform external id (or any
/// other non-UUID) is a 404; there is no fallback lookup.
fn parse_automation_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::not_found("automation not found"))
}

fn summary_json(automation: &DiscoveredAutomation) -> Value {
    json!({
        "id": automation.id,
        "name": automation.name,
        "description": automation.description,
        "automation_type": automation.automation_type,
        "risk": {
            "score": automation.current_score(),
            "level": automation.current_level(),
        },
        "first_discovered_at": automation.first_discovered_at,
        "last_triggered_at": automation.last_triggered_at,
        "metadata": {
            "external_id": automation.external_id,
            "platform_connection_id": automation.platform_connection_id,
            "platform": automation.platform_metadata.raw(),
        },
    })
}

/// List an organization's automations.
async fn list_automations(
    State(state): State<AppState>,
    Query(scope): Query<OrganizationScope>,
) -> Result<Json<Value>, ApiError> {
    let automations = state
        .automations
        .list_by_organization(scope.organization_id)
        .await?;

    Ok(Json(json!({
        "automations": automations.iter().map(summary_json).collect::<Vec<_>>(),
        "total": automations.len(),
    })))
}

/// Automation details with OAuth scope enrichment and risk history
/// queries. The path id must be the UUID.
async fn automation_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let automation_id = parse_automation_id(&id)?;

    let automation = state
        .automations
        .get(automation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("automation not found"))?;

    let scope_analysis = state
        .scope_library
        .enrich(&automation.permissions_required)
        .await?;

    let history_slice = &automation.risk_score_history;
    let trend = history::trend(history_slice, chrono::Duration::days(30), chrono::Utc::now());
    let peak = history::peak(history_slice);
    let average = history::average(history_slice);
    let current_score = automation.current_score();
    let current_level = automation.current_level();

    Ok(Json(json!({
        "id": automation.id,
        "name": automation.name,
        "description": automation.description,
        "automation_type": automation.automation_type,
        "permissions": scope_analysis.scopes,
        "riskAnalysis": {
            "overallRisk": scope_analysis.overall_risk,
            "currentScore": current_score,
            "currentLevel": current_level,
            "trend": trend,
            "peak": peak.map(|(score, timestamp)| json!({"score": score, "timestamp": timestamp})),
            "average": average,
        },
        "riskScoreHistory": automation.risk_score_history,
        "detectionMetadata": automation.detection_metadata,
        "metadata": {
            "external_id": automation.external_id,
            "platform": automation.platform_metadata.raw(),
        },
    })))
}

/// Manual risk reassessment. Always appends a history entry with trigger
/// `manual_reassessment`, even when the recomputed score is unchanged.
async fn reassess_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReassessRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let automation_id = parse_automation_id(&id)?;

    if request.factors.is_empty() {
        return Err(ApiError::bad_request("at least one factor is required"));
    }

    let automation = state
        .automations
        .get(automation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("automation not found"))?;

    let factors: Vec<RiskFactor> = request
        .factors
        .into_iter()
        .map(|f| RiskFactor {
            factor_type: f.factor_type,
            score: f.score,
            description: f.description,
        })
        .collect();

    let old_score = automation.current_score();
    let entry = state
        .scorer
        .reassess_manual(automation.organization_id, &automation, factors);

    state
        .automations
        .append_risk_entry(automation_id, &entry)
        .await?;

    let _ = state
        .audit
        .log_risk_change(
            automation.organization_id,
            automation_id,
            Some(old_score),
            entry.score,
            entry.trigger.as_str(),
            request.user_id.as_deref(),
        )
        .await;

    Ok((
        StatusCode::OK,
        Json(json!({
            "id": automation_id,
            "entry": entry,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_accepted() {
        let id = Uuid::new_v4();
        assert_eq!(parse_automation_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_external_ids_are_not_found() {
        // Platform external ids must never resolve through this surface.
        assert!(parse_automation_id("oauth-app-123").is_err());
        assert!(parse_automation_id("A0123").is_err());
        assert!(parse_automation_id("").is_err());
    }
}
