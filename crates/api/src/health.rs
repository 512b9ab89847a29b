//! Health check endpoints.
//!
//! `/health` is a liveness probe: it answers 200 whenever the process is
//! responsive, with no dependency checks. `/ready` validates PostgreSQL
//! and Redis connectivity and answers 503 until both hold, so load
//! balancers and orchestrators only route traffic to working instances.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = Object)
    ),
    tag = "health"
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "singura-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Service is ready", body = Object),
        (status = 503, description = "Service is not ready", body = Object)
    ),
    tag = "health"
)]
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = match state.db.check_health().await {
        Ok(_) => true,
        Err(e) => {
            error!("Database health check failed: {}", e);
            false
        }
    };

    let redis_healthy = {
        let mut conn = state.redis.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                error!("Redis health check failed: {}", e);
                false
            }
        }
    };

    let is_ready = db_healthy && redis_healthy;

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "ready": is_ready,
            "checks": {
                "database": db_healthy,
                "redis": redis_healthy,
            }
        })),
    )
}

/// Prometheus exposition endpoint.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.gather() {
        Ok(rendered) => (StatusCode::OK, rendered),
        Err(e) => {
            error!("Metrics rendering failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
