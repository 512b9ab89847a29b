//! Platform connectors.
//!
//! One connector per platform, each normalizing that platform's app
//! inventory and activity feed into the canonical shapes
//! ([`AutomationCandidate`], [`ActivityEvent`]). Connectors honor
//! `Retry-After` on rate limits, never propagate null actor ids or
//! timestamps upward (malformed items are dropped and counted), and only
//! the Google connector maps `platformMetadata.scopes` into
//! `permissions_required`.

pub mod google;
pub mod microsoft;
pub mod slack;

use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use singura_core::{ActivityEvent, AutomationCandidate, OAuthCredentials, PlatformConnection, PlatformType};
use std::pin::Pin;
use tracing::warn;

pub use google::GoogleConnector;
pub use microsoft::MicrosoftConnector;
pub use slack::SlackConnector;

/// Finite, non-restartable activity sequence for one discovery window.
pub type ActivityStream = Pin<Box<dyn Stream<Item = Result<ActivityEvent>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> PlatformType;

    /// Enumerate bots, apps, scripts, and service accounts visible to this
    /// connection.
    async fn list_automations(
        &self,
        connection: &PlatformConnection,
        credentials: &OAuthCredentials,
    ) -> Result<Vec<AutomationCandidate>>;

    /// Stream normalized activity between `since` and `until`. The stream
    /// is finite and cannot be restarted within one call.
    fn stream_activity(
        &self,
        connection: &PlatformConnection,
        credentials: &OAuthCredentials,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> ActivityStream;
}

/// Attempts for one upstream page before surfacing the failure.
const MAX_FETCH_ATTEMPTS: u32 = 4;

/// GET a JSON document with `Retry-After`-honoring backoff. Exhausting the
/// budget on 429s surfaces [`PlatformError::RateLimited`], which discovery
/// treats as a partial run rather than a failure.
pub(crate) async fn get_json_with_backoff(
    http: &reqwest::Client,
    url: &str,
    bearer: &str,
) -> Result<serde_json::Value> {
    let mut last_retry_after = 1;

    for attempt in 0..MAX_FETCH_ATTEMPTS {
        let response = http.get(url).bearer_auth(bearer).send().await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                if attempt + 1 == MAX_FETCH_ATTEMPTS {
                    return Err(e.into());
                }
                tokio::time::sleep(std::time::Duration::from_millis(250 * (1 << attempt))).await;
                continue;
            }
        };

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            last_retry_after = retry_after;
            warn!(url, retry_after, "Platform rate limited; backing off");
            if attempt + 1 == MAX_FETCH_ATTEMPTS {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(retry_after)).await;
            continue;
        }

        if status.is_server_error() {
            if attempt + 1 == MAX_FETCH_ATTEMPTS {
                return Err(PlatformError::Unavailable(format!(
                    "{} returned {}",
                    url, status
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(250 * (1 << attempt))).await;
            continue;
        }

        if !status.is_success() {
            return Err(PlatformError::Unavailable(format!(
                "{} returned {}",
                url, status
            )));
        }

        return Ok(response.json().await?);
    }

    Err(PlatformError::RateLimited {
        retry_after_seconds: last_retry_after,
    })
}

/// Parse an RFC 3339 timestamp, returning `None` (drop the event) on
/// anything malformed.
pub(crate) fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Non-empty string or `None`.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    match value {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    }
}
