//! # Singura API Server
//!
//! HTTP entry point for the shadow-AI discovery platform. The server wires
//! the credential store, OAuth lifecycle, platform connectors, discovery
//! workers, detection pipeline, and realtime fan-out into one axum
//! application.
//!
//! ## Startup sequence
//!
//! 1. Tracing and configuration (fail fast on insecure values)
//! 2. PostgreSQL pool, migrations, and the schema verifier; a missing
//!    table or audit-log column aborts startup with a remediation hint
//! 3. Redis (discovery run queue)
//! 4. Service graph construction and worker pool spawn
//! 5. Router with security headers, request ids, tracing, compression,
//!    CORS, and graceful shutdown

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use redis::aio::ConnectionManager;
use singura_core::{
    AuditLogger, Config, CredentialCipher, DatabasePool, DatabaseAuditRepository, EventBus,
    MetricsRegistry, PlatformType,
};
use singura_detection::{DetectionPipeline, RiskScoringEngine};
use singura_discovery::{
    DiscoveryOrchestrator, DiscoveryWorkerPool, PostgresAutomationRepository,
    PostgresCorrelationRepository, PostgresRunRepository, RedisRunQueue,
};
use singura_platforms::{
    Connector, GoogleConnector, MicrosoftConnector, OAuthLifecycle, PostgresConnectionRepository,
    PostgresCredentialStore, SlackConnector, TokenRefreshClient,
};
use std::collections::HashMap;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use axum::http::{HeaderName, HeaderValue, Method};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api_middleware;
mod error;
mod handlers;
mod health;
mod realtime;
mod scope_library;
mod state;

use crate::{
    handlers::{automations, connections, discovery},
    scope_library::ScopeLibrary,
    state::AppState,
};

fn build_cors_layer(
    cors_config: &singura_core::config::CorsConfig,
) -> Result<CorsLayer, Box<dyn std::error::Error>> {
    let mut cors = CorsLayer::new();

    if cors_config.allowed_origins.contains(&"*".to_string()) {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Result<Vec<HeaderValue>, _> = cors_config
            .allowed_origins
            .iter()
            .map(|origin| origin.parse())
            .collect();
        cors = cors.allow_origin(origins?);
    }

    if cors_config.allowed_methods.contains(&"*".to_string()) {
        cors = cors.allow_methods(Any);
    } else {
        let methods: Result<Vec<Method>, _> = cors_config
            .allowed_methods
            .iter()
            .map(|method| method.parse())
            .collect();
        cors = cors.allow_methods(methods?);
    }

    if cors_config.allowed_headers.contains(&"*".to_string()) {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Result<Vec<HeaderName>, _> = cors_config
            .allowed_headers
            .iter()
            .map(|header| header.parse())
            .collect();
        cors = cors.allow_headers(headers?);
    }

    if !cors_config.expose_headers.is_empty() {
        let expose_headers: Result<Vec<HeaderName>, _> = cors_config
            .expose_headers
            .iter()
            .map(|header| header.parse())
            .collect();
        cors = cors.expose_headers(expose_headers?);
    }

    cors = cors.allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Singura server...");

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let db = DatabasePool::new(config.database.clone()).await?;
    info!("Database pool initialized");

    run_migrations(&db).await?;
    info!("Database migrations completed");

    // Fail fast when the schema is incomplete, in particular the distinct
    // audit-log timestamp/created_at columns.
    db.verify_schema().await?;

    let redis = init_redis(&config.redis.url).await?;
    info!("Redis connection established");

    let metrics = Arc::new(MetricsRegistry::new(&config.metrics.namespace)?);
    let bus = Arc::new(EventBus::new(config.realtime.channel_capacity, metrics.clone()));

    let audit = AuditLogger::new(Arc::new(DatabaseAuditRepository::new(Arc::new(
        db.pool.clone(),
    ))));

    // Credential plane
    let cipher = Arc::new(CredentialCipher::new(&config.encryption)?);
    let credentials = Arc::new(PostgresCredentialStore::new(db.pool.clone(), cipher));
    let connections_repo = Arc::new(PostgresConnectionRepository::new(db.pool.clone()));
    let refresh_client = Arc::new(TokenRefreshClient::new(
        config.oauth.clone(),
        metrics.clone(),
        config.discovery.max_refresh_retries,
    ));
    let lifecycle = Arc::new(OAuthLifecycle::new(
        credentials.clone(),
        connections_repo.clone(),
        refresh_client,
        bus.clone(),
        Some(audit.clone()),
    ));

    // Discovery plane
    let automations_repo = Arc::new(PostgresAutomationRepository::new(db.pool.clone()));
    let runs_repo = Arc::new(PostgresRunRepository::new(db.pool.clone()));
    let correlations_repo = Arc::new(PostgresCorrelationRepository::new(db.pool.clone()));
    let pipeline = Arc::new(DetectionPipeline::with_defaults(metrics.clone()));
    let scorer = Arc::new(RiskScoringEngine::new(bus.clone()));

    let mut connectors: HashMap<PlatformType, Arc<dyn Connector>> = HashMap::new();
    connectors.insert(
        PlatformType::Slack,
        Arc::new(SlackConnector::new(metrics.clone())),
    );
    connectors.insert(
        PlatformType::Google,
        Arc::new(GoogleConnector::new(metrics.clone())),
    );
    connectors.insert(
        PlatformType::Microsoft,
        Arc::new(MicrosoftConnector::new(metrics.clone())),
    );

    let orchestrator = Arc::new(DiscoveryOrchestrator::new(
        connections_repo.clone(),
        lifecycle.clone(),
        connectors,
        automations_repo.clone(),
        runs_repo.clone(),
        correlations_repo.clone(),
        pipeline,
        scorer.clone(),
        bus.clone(),
        Some(audit.clone()),
        metrics.clone(),
        config.discovery.clone(),
        config.detection.clone(),
    ));

    let run_queue = Arc::new(RedisRunQueue::new(
        redis.clone(),
        config.discovery.run_queue.clone(),
    ));

    let shutdown = CancellationToken::new();
    let worker_pool = DiscoveryWorkerPool::new(
        run_queue.clone(),
        orchestrator.clone(),
        config.discovery.worker_pool_size,
        shutdown.clone(),
    );
    let worker_handles = worker_pool.spawn();
    info!(
        workers = config.discovery.worker_pool_size,
        "Discovery worker pool started"
    );

    let scope_library = Arc::new(ScopeLibrary::new(db.clone()));

    let app_state = AppState {
        config: config.clone(),
        db,
        redis,
        bus,
        metrics,
        audit,
        connections: connections_repo,
        credentials,
        automations: automations_repo,
        runs: runs_repo,
        correlations: correlations_repo,
        lifecycle,
        scorer,
        orchestrator,
        run_queue,
        scope_library,
    };

    let app = create_app(app_state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the worker pool and let in-flight runs abort cooperatively.
    shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("Server shutdown complete");
    Ok(())
}

fn create_app(state: AppState) -> Result<Router, Box<dyn std::error::Error>> {
    #[derive(OpenApi)]
    #[openapi(
        paths(
            health::health_check,
            health::readiness_check,
        ),
        components(schemas()),
        tags(
            (name = "health", description = "Health check endpoints"),
            (name = "automations", description = "Discovered automation inventory"),
            (name = "connections", description = "Platform connection management"),
            (name = "discovery", description = "Discovery runs and correlation"),
        )
    )]
    struct ApiDoc;

    let router = Router::new()
        .nest("/api/v1", create_api_routes())
        .nest("/realtime", realtime::realtime_routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .route("/metrics", axum::routing::get(health::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(
                    api_middleware::security_headers::security_headers_middleware,
                ))
                .layer(axum::middleware::from_fn(
                    api_middleware::request_id::request_id_middleware,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CompressionLayer::new())
                .layer(build_cors_layer(&state.config.cors)?),
        )
        .with_state(state)
        .fallback(handler_404);

    Ok(router)
}

fn create_api_routes() -> Router<AppState> {
    Router::new()
        .nest("/automations", automations::automation_routes())
        .nest("/connections", connections::connection_routes())
        .nest("/discovery", discovery::discovery_routes())
}

async fn handler_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Resource not found"
        })),
    )
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "singura_api=debug,singura_core=debug,singura_platforms=debug,singura_detection=debug,singura_discovery=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn init_redis(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(url)?;
    ConnectionManager::new(client).await
}

async fn run_migrations(db: &DatabasePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("../../migrations");
    migrator.run(&db.pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
