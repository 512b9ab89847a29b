//! OAuth credential lifecycle.
//!
//! [`OAuthLifecycle::get_valid`] is the canonical entry point for any
//! consumer that needs credentials that are valid *now*: it applies the
//! five-minute safety margin, refreshes through the platform token endpoint
//! when needed, and keeps concurrent callers on one connection behind a
//! single upstream refresh.

use crate::connections::ConnectionRepository;
use crate::credentials::CredentialStore;
use crate::error::{PlatformError, Result};
use crate::oauth::refresh::TokenRefreshClient;
use crate::oauth::singleflight::RefreshFlights;
use chrono::Utc;
use singura_core::{
    audit::{AuditLogger, EventType},
    events::{NotificationLevel, RealtimeMessage, RealtimePayload},
    ConnectionStatus, EventBus, OAuthCredentials, PlatformConnection, Uuid,
};
use std::sync::Arc;
use tracing::{info, warn};

pub struct OAuthLifecycle {
    store: Arc<dyn CredentialStore>,
    connections: Arc<dyn ConnectionRepository>,
    refresh_client: Arc<TokenRefreshClient>,
    bus: Arc<EventBus>,
    audit: Option<AuditLogger>,
    flights: RefreshFlights,
}

impl OAuthLifecycle {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        connections: Arc<dyn ConnectionRepository>,
        refresh_client: Arc<TokenRefreshClient>,
        bus: Arc<EventBus>,
        audit: Option<AuditLogger>,
    ) -> Self {
        Self {
            store,
            connections,
            refresh_client,
            bus,
            audit,
            flights: RefreshFlights::new(),
        }
    }

    /// Deliver a credential set that is valid now, with a five-minute
    /// safety margin.
    ///
    /// Returns `None` when no credentials are stored or when a required
    /// refresh failed terminally; in the latter case the connection has
    /// been marked `error` and a system notification has gone out.
    pub async fn get_valid(&self, connection_id: Uuid) -> Result<Option<OAuthCredentials>> {
        let Some(credentials) = self.store.get(connection_id).await? else {
            return Ok(None);
        };

        if !credentials.needs_refresh(Utc::now()) {
            return Ok(Some(credentials));
        }

        // Serialize refresh per connection; unrelated operations proceed.
        let _guard = self.flights.acquire(connection_id).await;

        // Re-read under the lock: a concurrent caller may have already
        // refreshed and persisted while we waited.
        let Some(credentials) = self.store.get(connection_id).await? else {
            return Ok(None);
        };
        if !credentials.needs_refresh(Utc::now()) {
            return Ok(Some(credentials));
        }

        let connection = self
            .connections
            .get(connection_id)
            .await?
            .ok_or(PlatformError::ConnectionNotFound(connection_id))?;

        match self
            .refresh_client
            .refresh(
                connection.platform_type,
                &credentials,
                connection.metadata.tenant_id(),
            )
            .await
        {
            Ok(refreshed) => {
                self.store.store(connection_id, &refreshed).await?;

                if let Some(audit) = &self.audit {
                    let _ = audit
                        .log_credential_event(
                            EventType::CredentialsRefreshed,
                            connection.organization_id,
                            connection_id,
                            "refresh succeeded",
                        )
                        .await;
                }

                info!(
                    connection_id = %connection_id,
                    platform = %connection.platform_type,
                    "Credentials refreshed"
                );
                Ok(Some(refreshed))
            }
            Err(e) => {
                self.mark_refresh_failed(&connection, &e).await?;
                Ok(None)
            }
        }
    }

    async fn mark_refresh_failed(
        &self,
        connection: &PlatformConnection,
        cause: &PlatformError,
    ) -> Result<()> {
        let last_error = format!("refresh_failed: {}", cause);

        warn!(
            connection_id = %connection.id,
            platform = %connection.platform_type,
            error = %cause,
            "Marking connection errored after refresh failure"
        );

        self.connections
            .set_status(
                connection.id,
                ConnectionStatus::Error,
                Some(last_error.clone()),
            )
            .await?;

        self.bus.publish(RealtimeMessage::new(
            connection.organization_id,
            RealtimePayload::ConnectionUpdate {
                connection_id: connection.id,
                status: ConnectionStatus::Error,
                platform: connection.platform_type,
            },
        ));
        self.bus.publish(RealtimeMessage::new(
            connection.organization_id,
            RealtimePayload::SystemNotification {
                level: NotificationLevel::Error,
                message: format!(
                    "Connection '{}' needs attention: {}",
                    connection.display_name, last_error
                ),
            },
        ));

        if let Some(audit) = &self.audit {
            let _ = audit
                .log_credential_event(
                    EventType::CredentialsRefreshFailed,
                    connection.organization_id,
                    connection.id,
                    &last_error,
                )
                .await;
        }

        Ok(())
    }

    /// Revoke upstream (best-effort) and always erase the local row.
    pub async fn revoke(&self, connection_id: Uuid) -> Result<()> {
        if let Some(credentials) = self.store.get(connection_id).await? {
            if let Some(connection) = self.connections.get(connection_id).await? {
                if let Err(e) = self
                    .refresh_client
                    .revoke(connection.platform_type, &credentials)
                    .await
                {
                    // Local deletion proceeds regardless.
                    warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "Remote revocation failed; deleting local credentials anyway"
                    );
                }

                if let Some(audit) = &self.audit {
                    let _ = audit
                        .log_credential_event(
                            EventType::CredentialsRevoked,
                            connection.organization_id,
                            connection_id,
                            "credentials revoked",
                        )
                        .await;
                }
            }
        }

        self.store.remove(connection_id).await
    }
}
