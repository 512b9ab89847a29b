//! Cross-platform fingerprints.
//!
//! A fingerprint is a hash-like value that equates automations across
//! platforms: the AI account they talk to, the schedule they run on, or
//! the shape of their behavior.

use sha2::{Digest, Sha256};
use singura_core::{ActionType, AiProviderInfo};
use std::collections::HashMap;

fn digest(prefix: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    let output = hasher.finalize();
    // 16 bytes of hex is plenty for equality matching.
    output[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fingerprint of the AI account behind an automation. Prefers an explicit
/// connector-supplied fingerprint, then the OAuth client id, then the
/// API-key suffix.
pub fn ai_provider_fingerprint(provider: &AiProviderInfo) -> Option<String> {
    if let Some(fingerprint) = provider.fingerprint.as_deref() {
        return Some(digest("ai", fingerprint));
    }
    if let Some(client_id) = provider.client_id.as_deref() {
        return Some(digest("ai", client_id));
    }
    provider
        .api_key_suffix
        .as_deref()
        .map(|suffix| digest("ai", suffix))
}

/// Quantize a discovered schedule into a coarse cadence bucket so that
/// e.g. "every hour at :05" and "hourly" land in the same bucket.
pub fn quantize_schedule(schedule: &str) -> Option<&'static str> {
    let lowered = schedule.to_lowercase();

    if lowered.contains("minute") && !lowered.contains("60 minute") {
        return Some("sub_hourly");
    }
    if lowered.contains("hour") || lowered.contains("60 minute") {
        return Some("hourly");
    }
    if lowered.contains("day") || lowered.contains("daily") || lowered.contains("night") {
        return Some("daily");
    }
    if lowered.contains("week") {
        return Some("weekly");
    }

    // Five-field cron expressions.
    let fields: Vec<&str> = lowered.split_whitespace().collect();
    if fields.len() == 5 {
        return Some(match (fields[0], fields[1], fields[2]) {
            (minute, "*", _) if minute != "*" => "hourly",
            (_, hour, "*") if hour != "*" => "daily",
            (_, _, day) if day != "*" => "monthly",
            _ => "sub_hourly",
        });
    }

    None
}

/// Fingerprint of an automation's execution cadence.
pub fn timing_fingerprint(schedule: &str) -> Option<String> {
    quantize_schedule(schedule).map(|bucket| digest("timing", bucket))
}

/// Fingerprint of the ordered top-3 action types by frequency. Fewer than
/// three distinct actions still fingerprint; an empty history does not.
pub fn behavior_fingerprint(actions: &[ActionType]) -> Option<String> {
    if actions.is_empty() {
        return None;
    }

    let mut counts: HashMap<ActionType, usize> = HashMap::new();
    for action in actions {
        *counts.entry(*action).or_default() += 1;
    }

    let mut ranked: Vec<(ActionType, usize)> = counts.into_iter().collect();
    // Frequency descending, then name for a stable order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.as_str().cmp(b.0.as_str())));

    let top: Vec<&str> = ranked.iter().take(3).map(|(a, _)| a.as_str()).collect();
    Some(digest("behavior", &top.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ai_fingerprint_prefers_explicit() {
        let with_fingerprint = AiProviderInfo {
            vendor: "anthropic".into(),
            client_id: Some("client-1".into()),
            api_key_suffix: None,
            fingerprint: Some("claude-xyz".into()),
        };
        let with_same_fingerprint = AiProviderInfo {
            vendor: "anthropic".into(),
            client_id: Some("client-2".into()),
            api_key_suffix: None,
            fingerprint: Some("claude-xyz".into()),
        };

        // Same upstream account, different grants: fingerprints match.
        assert_eq!(
            ai_provider_fingerprint(&with_fingerprint),
            ai_provider_fingerprint(&with_same_fingerprint)
        );
    }

    #[test]
    fn test_ai_fingerprint_from_client_id() {
        let provider = AiProviderInfo {
            vendor: "openai".into(),
            client_id: Some("org-abc".into()),
            api_key_suffix: None,
            fingerprint: None,
        };
        assert!(ai_provider_fingerprint(&provider).is_some());

        let empty = AiProviderInfo::default();
        assert!(ai_provider_fingerprint(&empty).is_none());
    }

    #[test]
    fn test_schedule_quantization() {
        assert_eq!(quantize_schedule("every hour"), Some("hourly"));
        assert_eq!(quantize_schedule("hourly at :05"), Some("hourly"));
        assert_eq!(quantize_schedule("0 * * * *"), Some("hourly"));
        assert_eq!(quantize_schedule("30 2 * * *"), Some("daily"));
        assert_eq!(quantize_schedule("every 5 minutes"), Some("sub_hourly"));
        assert_eq!(quantize_schedule("weekly digest"), Some("weekly"));
        assert_eq!(quantize_schedule("whenever"), None);
    }

    #[test]
    fn test_hourly_schedules_share_fingerprint() {
        assert_eq!(
            timing_fingerprint("every hour"),
            timing_fingerprint("5 * * * *")
        );
        assert_ne!(
            timing_fingerprint("every hour"),
            timing_fingerprint("30 2 * * *")
        );
    }

    #[test]
    fn test_behavior_fingerprint_order_sensitive() {
        let mostly_shares = vec![
            ActionType::FileShare,
            ActionType::FileShare,
            ActionType::FileShare,
            ActionType::FileCreate,
            ActionType::FileCreate,
            ActionType::PermissionChange,
        ];
        let mostly_creates = vec![
            ActionType::FileCreate,
            ActionType::FileCreate,
            ActionType::FileCreate,
            ActionType::FileShare,
            ActionType::FileShare,
            ActionType::PermissionChange,
        ];

        // Same action set, different dominance order: different prints.
        assert_ne!(
            behavior_fingerprint(&mostly_shares),
            behavior_fingerprint(&mostly_creates)
        );
        assert_eq!(
            behavior_fingerprint(&mostly_shares),
            behavior_fingerprint(&mostly_shares)
        );
        assert!(behavior_fingerprint(&[]).is_none());
    }
}
