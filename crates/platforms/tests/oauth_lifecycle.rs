//! OAuth lifecycle behavior against a mocked token endpoint: expiry-driven
//! refresh, permanent rejection handling, and single-flight refresh under
//! concurrent load.

use chrono::{Duration, Utc};
use singura_core::{
    config::{OAuthClientConfig, OAuthConfig},
    events::RealtimePayload,
    ConnectionStatus, EventBus, MetricsRegistry, OAuthCredentials, PlatformConnection,
    PlatformMetadata, PlatformType, Uuid,
};
use singura_platforms::{
    connections::InMemoryConnectionRepository, credentials::InMemoryCredentialStore,
    ConnectionRepository, CredentialStore, OAuthLifecycle, TokenRefreshClient,
};
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    lifecycle: Arc<OAuthLifecycle>,
    store: Arc<InMemoryCredentialStore>,
    connections: Arc<InMemoryConnectionRepository>,
    bus: Arc<EventBus>,
    connection_id: Uuid,
    organization_id: Uuid,
}

fn oauth_config(token_endpoint: &str) -> OAuthConfig {
    let client = OAuthClientConfig {
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        token_endpoint: token_endpoint.to_string(),
        revoke_endpoint: None,
    };
    OAuthConfig {
        google: client.clone(),
        slack: client.clone(),
        microsoft: client,
    }
}

fn expired_credentials() -> OAuthCredentials {
    OAuthCredentials {
        access_token: "stale".to_string(),
        refresh_token: Some("R".to_string()),
        scope: "https://www.googleapis.com/auth/drive.readonly".to_string(),
        token_type: "Bearer".to_string(),
        expires_at: Some(Utc::now() - Duration::seconds(3600)),
        platform_specific: serde_json::Value::Null,
    }
}

async fn harness(server: &MockServer, namespace: &str) -> Harness {
    let metrics = Arc::new(MetricsRegistry::new(namespace).unwrap());
    let bus = Arc::new(EventBus::new(1024, metrics.clone()));
    let store = Arc::new(InMemoryCredentialStore::new());
    let connections = Arc::new(InMemoryConnectionRepository::new());

    let organization_id = Uuid::new_v4();
    let connection_id = Uuid::new_v4();
    connections.insert(PlatformConnection {
        id: connection_id,
        organization_id,
        platform_type: PlatformType::Google,
        platform_user_id: "admin@example.com".to_string(),
        workspace_id: None,
        display_name: "Google Workspace".to_string(),
        status: ConnectionStatus::Active,
        last_error: None,
        metadata: PlatformMetadata::empty(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });

    store
        .store(connection_id, &expired_credentials())
        .await
        .unwrap();

    let refresh_client = Arc::new(TokenRefreshClient::new(
        oauth_config(&format!("{}/token", server.uri())),
        metrics,
        3,
    ));

    let lifecycle = Arc::new(OAuthLifecycle::new(
        store.clone(),
        connections.clone(),
        refresh_client,
        bus.clone(),
        None,
    ));

    Harness {
        lifecycle,
        store,
        connections,
        bus,
        connection_id,
        organization_id,
    }
}

#[tokio::test]
async fn test_expired_token_auto_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "singura_t_refresh").await;

    let refreshed = h.lifecycle.get_valid(h.connection_id).await.unwrap().unwrap();
    assert_eq!(refreshed.access_token, "new");
    // Server did not rotate the refresh token, so the old one is preserved.
    assert_eq!(refreshed.refresh_token.as_deref(), Some("R"));
    let expires_at = refreshed.expires_at.unwrap();
    assert!(expires_at > Utc::now() + Duration::seconds(3500));

    // The refreshed set was persisted.
    let stored = h.store.get(h.connection_id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "new");
}

#[tokio::test]
async fn test_refresh_token_revoked_marks_connection_errored() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"error": "invalid_grant"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "singura_t_revoked").await;
    let mut subscription = h.bus.subscribe(h.organization_id);

    let result = h.lifecycle.get_valid(h.connection_id).await.unwrap();
    assert!(result.is_none());

    let connection = h.connections.get(h.connection_id).await.unwrap().unwrap();
    assert_eq!(connection.status, ConnectionStatus::Error);
    let last_error = connection.last_error.unwrap();
    assert!(last_error.starts_with("refresh_failed:"), "{}", last_error);
    assert!(last_error.contains("re-authenticate"), "{}", last_error);

    // A connection.update followed by a system.notification went out.
    let mut saw_notification = false;
    while let Ok(message) = subscription.try_recv() {
        if let RealtimePayload::SystemNotification { message, .. } = message.payload {
            assert!(message.contains("re-authenticate"));
            saw_notification = true;
        }
    }
    assert!(saw_notification, "expected a system.notification event");
}

#[tokio::test]
async fn test_transient_failures_retried_then_succeed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "after-retries",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "singura_t_transient").await;

    let refreshed = h.lifecycle.get_valid(h.connection_id).await.unwrap().unwrap();
    assert_eq!(refreshed.access_token, "after-retries");

    let connection = h.connections.get(h.connection_id).await.unwrap().unwrap();
    assert_eq!(connection.status, ConnectionStatus::Active);
}

#[tokio::test]
async fn test_concurrent_get_valid_hits_endpoint_once() {
    let server = MockServer::start().await;

    // The endpoint tolerates any number of calls; the assertion below is
    // that exactly one arrived.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_millis(50))
                .set_body_json(serde_json::json!({
                    "access_token": "single-flight",
                    "expires_in": 3600
                })),
        )
        .mount(&server)
        .await;

    let h = harness(&server, "singura_t_singleflight").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lifecycle = h.lifecycle.clone();
        let connection_id = h.connection_id;
        handles.push(tokio::spawn(async move {
            lifecycle.get_valid(connection_id).await.unwrap().unwrap()
        }));
    }

    for handle in handles {
        let credentials = handle.await.unwrap();
        assert_eq!(credentials.access_token, "single-flight");
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "refresh endpoint must be hit exactly once");
}

#[tokio::test]
async fn test_get_valid_absent_credentials_returns_none() {
    let server = MockServer::start().await;
    let h = harness(&server, "singura_t_absent").await;

    let unknown = Uuid::new_v4();
    assert!(h.lifecycle.get_valid(unknown).await.unwrap().is_none());
}

#[tokio::test]
async fn test_revoke_deletes_locally_even_when_remote_fails() {
    let server = MockServer::start().await;
    // No revoke endpoint configured; remote call is skipped entirely.
    let h = harness(&server, "singura_t_revoke").await;

    h.lifecycle.revoke(h.connection_id).await.unwrap();
    assert!(h.store.get(h.connection_id).await.unwrap().is_none());
}
