use super::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use crate::error::Result;
use singura_core::RiskLevel;

/// Flags actors whose action rate exceeds the configured events-per-second
/// threshold. Human operators in SaaS tools do not sustain multiple
/// mutations per second; scripts and bots do.
pub struct VelocityDetector;

impl Detector for VelocityDetector {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn detect(&self, window: &EventWindow, context: &DetectorContext) -> Result<Vec<Detection>> {
        let threshold = context.config.velocity_events_per_second;
        let mut detections = Vec::new();

        for (actor, events) in window.events_by_actor() {
            if events.len() < 3 {
                continue;
            }

            let first = events.first().unwrap().timestamp;
            let last = events.last().unwrap().timestamp;
            let span_seconds = (last - first).num_milliseconds().max(1) as f64 / 1000.0;
            let events_per_second = events.len() as f64 / span_seconds;

            if events_per_second <= threshold {
                continue;
            }

            let ratio = events_per_second / threshold;
            let confidence = (0.5 + 0.1 * ratio).min(0.95);
            let severity = if ratio >= 5.0 {
                RiskLevel::High
            } else {
                RiskLevel::Medium
            };

            detections.push(Detection {
                external_actor_id: actor.to_string(),
                pattern_type: PatternType::Velocity,
                confidence,
                severity,
                evidence: serde_json::json!({
                    "eventsPerSecond": events_per_second,
                    "threshold": threshold,
                    "eventCount": events.len(),
                }),
            });
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testutil::{context, event, window};
    use chrono::{Duration, Utc};
    use singura_core::ActionType;

    #[test]
    fn test_burst_detected() {
        let start = Utc::now();
        let events = (0..30)
            .map(|i| {
                event(
                    "bot-1",
                    ActionType::FileEdit,
                    start + Duration::milliseconds(i * 100),
                )
            })
            .collect();

        let detections = VelocityDetector
            .detect(&window(events), &context())
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].pattern_type, PatternType::Velocity);
        let eps = detections[0].evidence["eventsPerSecond"].as_f64().unwrap();
        assert!(eps > 2.0);
    }

    #[test]
    fn test_human_pace_not_flagged() {
        let start = Utc::now();
        let events = (0..10)
            .map(|i| {
                event(
                    "alice",
                    ActionType::FileEdit,
                    start + Duration::seconds(i * 45),
                )
            })
            .collect();

        let detections = VelocityDetector
            .detect(&window(events), &context())
            .unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_too_few_events_ignored() {
        let start = Utc::now();
        let events = vec![
            event("b", ActionType::FileEdit, start),
            event("b", ActionType::FileEdit, start + Duration::milliseconds(10)),
        ];
        let detections = VelocityDetector
            .detect(&window(events), &context())
            .unwrap();
        assert!(detections.is_empty());
    }
}
