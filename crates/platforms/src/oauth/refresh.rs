//! Platform-dispatched OAuth token refresh.
//!
//! One client covers the three consumed token endpoints:
//!
//! | Platform  | Endpoint                                  | Grant           |
//! |-----------|-------------------------------------------|-----------------|
//! | Google    | `oauth2.googleapis.com/token`             | `refresh_token` |
//! | Slack     | `slack.com/api/oauth.v2.access`           | `refresh_token` |
//! | Microsoft | tenant token endpoint (`{tenant}` in URL) | `refresh_token` |
//!
//! `{error: "invalid_grant"}` bodies are permanent (the user must
//! re-authenticate); network errors and 5xx responses are retried with
//! exponential backoff and jitter, honoring `Retry-After` on 429.

use crate::error::{PlatformError, Result};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use singura_core::{
    config::OAuthConfig, MetricsRegistry, OAuthCredentials, PlatformType,
};
use std::sync::Arc;
use tracing::{info, warn};

const BASE_BACKOFF_MS: u64 = 500;
const MAX_JITTER_MS: u64 = 250;

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    /// Slack envelopes its responses in `{ok: bool, ...}`.
    ok: Option<bool>,
    error: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    token_type: Option<String>,
}

pub struct TokenRefreshClient {
    http: reqwest::Client,
    config: OAuthConfig,
    metrics: Arc<MetricsRegistry>,
    max_retries: u32,
}

impl TokenRefreshClient {
    pub fn new(config: OAuthConfig, metrics: Arc<MetricsRegistry>, max_retries: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            metrics,
            max_retries,
        }
    }

    fn endpoint_for(&self, platform: PlatformType, tenant_id: Option<&str>) -> String {
        let client = self.config.for_platform(platform);
        match platform {
            PlatformType::Microsoft => client
                .token_endpoint
                .replace("{tenant}", tenant_id.unwrap_or("common")),
            _ => client.token_endpoint.clone(),
        }
    }

    /// Exchange the refresh token for fresh credentials. The returned set
    /// keeps the previous refresh token unless the platform rotated it.
    pub async fn refresh(
        &self,
        platform: PlatformType,
        current: &OAuthCredentials,
        tenant_id: Option<&str>,
    ) -> Result<OAuthCredentials> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            self.record_outcome(platform, "invalid_grant");
            return Err(PlatformError::RefreshRejected {
                detail: "no refresh token on file; re-authenticate".to_string(),
            });
        };

        let endpoint = self.endpoint_for(platform, tenant_id);
        let client = self.config.for_platform(platform);

        let mut last_transient: Option<PlatformError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
                let delay = BASE_BACKOFF_MS * (1 << (attempt - 1)) + jitter;
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let response = self
                .http
                .post(&endpoint)
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                ])
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        platform = %platform,
                        attempt,
                        error = %e,
                        "Token refresh request failed"
                    );
                    last_transient = Some(e.into());
                    continue;
                }
            };

            if response.status().as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(platform = %platform, retry_after, "Token endpoint rate limited");
                tokio::time::sleep(std::time::Duration::from_secs(retry_after)).await;
                last_transient = Some(PlatformError::RateLimited {
                    retry_after_seconds: retry_after,
                });
                continue;
            }

            if response.status().is_server_error() {
                last_transient = Some(PlatformError::Unavailable(format!(
                    "token endpoint returned {}",
                    response.status()
                )));
                continue;
            }

            let body: TokenEndpointResponse = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    last_transient = Some(PlatformError::MalformedResponse(e.to_string()));
                    continue;
                }
            };

            if let Some(error) = body.error.as_deref() {
                if error == "invalid_grant" || body.ok == Some(false) {
                    self.record_outcome(platform, "invalid_grant");
                    return Err(PlatformError::RefreshRejected {
                        detail: format!("{}; re-authenticate", error),
                    });
                }
                last_transient = Some(PlatformError::RefreshTransient {
                    detail: error.to_string(),
                });
                continue;
            }

            let Some(access_token) = body.access_token else {
                last_transient = Some(PlatformError::MalformedResponse(
                    "token response missing access_token".to_string(),
                ));
                continue;
            };

            self.record_outcome(platform, "success");
            info!(platform = %platform, "Refreshed OAuth credentials");

            return Ok(OAuthCredentials {
                access_token,
                // Preserve the existing refresh token unless the server
                // rotated it.
                refresh_token: body
                    .refresh_token
                    .or_else(|| current.refresh_token.clone()),
                scope: body.scope.unwrap_or_else(|| current.scope.clone()),
                token_type: body
                    .token_type
                    .unwrap_or_else(|| current.token_type.clone()),
                expires_at: body.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
                platform_specific: current.platform_specific.clone(),
            });
        }

        self.record_outcome(platform, "transient");
        Err(last_transient.unwrap_or(PlatformError::RefreshTransient {
            detail: "retry budget exhausted".to_string(),
        }))
    }

    /// Best-effort remote revocation. Callers proceed with local deletion
    /// regardless of the outcome.
    pub async fn revoke(&self, platform: PlatformType, credentials: &OAuthCredentials) -> Result<()> {
        let client = self.config.for_platform(platform);
        let Some(endpoint) = client.revoke_endpoint.as_deref() else {
            return Ok(());
        };

        let token = credentials
            .refresh_token
            .as_deref()
            .unwrap_or(credentials.access_token.as_str());

        let response = self
            .http
            .post(endpoint)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| PlatformError::RevocationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlatformError::RevocationFailed(format!(
                "revocation endpoint returned {}",
                response.status()
            )));
        }

        info!(platform = %platform, "Revoked OAuth credentials upstream");
        Ok(())
    }

    fn record_outcome(&self, platform: PlatformType, outcome: &str) {
        self.metrics
            .oauth_refresh_total
            .with_label_values(&[platform.as_str(), outcome])
            .inc();
    }
}
