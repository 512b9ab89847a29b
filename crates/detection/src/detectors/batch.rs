use super::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use crate::error::Result;
use chrono::Duration;
use singura_core::RiskLevel;
use std::collections::HashSet;

/// Flags runs of N similar actions on distinct resources within a short
/// window: the signature of scripted bulk operations (mass sharing,
/// mass export, mass ACL edits).
pub struct BatchOperationDetector;

impl Detector for BatchOperationDetector {
    fn name(&self) -> &'static str {
        "batch_operation"
    }

    fn detect(&self, window: &EventWindow, context: &DetectorContext) -> Result<Vec<Detection>> {
        let min_actions = context.config.batch_min_actions;
        let batch_window = Duration::seconds(context.config.batch_window_seconds);
        let mut detections = Vec::new();

        for (actor, events) in window.events_by_actor() {
            if events.len() < min_actions {
                continue;
            }

            // Slide over the chronologically sorted events; a batch is
            // min_actions same-typed events on distinct resources inside
            // the window.
            let mut best: Option<(usize, &'static str)> = None;

            for (start_idx, start_event) in events.iter().enumerate() {
                let mut distinct_resources: HashSet<&str> = HashSet::new();
                if let Some(resource) = start_event.resource.as_deref() {
                    distinct_resources.insert(resource);
                }

                for follow in events.iter().skip(start_idx + 1) {
                    if follow.timestamp - start_event.timestamp > batch_window {
                        break;
                    }
                    if follow.action_type != start_event.action_type {
                        continue;
                    }
                    if let Some(resource) = follow.resource.as_deref() {
                        distinct_resources.insert(resource);
                    }
                }

                if distinct_resources.len() >= min_actions {
                    let count = distinct_resources.len();
                    if best.map(|(c, _)| count > c).unwrap_or(true) {
                        best = Some((count, start_event.action_type.as_str()));
                    }
                }
            }

            if let Some((count, action)) = best {
                let confidence = (0.6 + 0.02 * count as f64).min(0.95);
                detections.push(Detection {
                    external_actor_id: actor.to_string(),
                    pattern_type: PatternType::BatchOperation,
                    confidence,
                    severity: RiskLevel::Medium,
                    evidence: serde_json::json!({
                        "distinctResources": count,
                        "actionType": action,
                        "windowSeconds": context.config.batch_window_seconds,
                    }),
                });
            }
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testutil::{context, window};
    use chrono::Utc;
    use singura_core::{ActionType, ActivityEvent};

    fn share_event(actor: &str, resource: &str, offset_seconds: i64) -> ActivityEvent {
        ActivityEvent {
            external_actor_id: actor.to_string(),
            action_type: ActionType::FileShare,
            timestamp: Utc::now() + Duration::seconds(offset_seconds),
            resource: Some(resource.to_string()),
            scope_hints: Vec::new(),
            payload_bytes: None,
        }
    }

    #[test]
    fn test_bulk_share_detected() {
        let events: Vec<_> = (0..12)
            .map(|i| share_event("bulk-bot", &format!("file-{}", i), i))
            .collect();

        let detections = BatchOperationDetector
            .detect(&window(events), &context())
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].pattern_type, PatternType::BatchOperation);
        assert!(detections[0].evidence["distinctResources"].as_u64().unwrap() >= 10);
    }

    #[test]
    fn test_repeated_edits_on_one_resource_not_a_batch() {
        let events: Vec<_> = (0..15).map(|i| share_event("editor", "same-file", i)).collect();

        let detections = BatchOperationDetector
            .detect(&window(events), &context())
            .unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_slow_spread_outside_window_not_a_batch() {
        // 12 distinct resources but spread over 20 minutes.
        let events: Vec<_> = (0..12)
            .map(|i| share_event("slow", &format!("file-{}", i), i * 100))
            .collect();

        let detections = BatchOperationDetector
            .detect(&window(events), &context())
            .unwrap();
        assert!(detections.is_empty());
    }
}
