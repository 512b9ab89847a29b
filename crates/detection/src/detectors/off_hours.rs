use super::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use crate::error::Result;
use chrono::Timelike;
use singura_core::RiskLevel;

/// Minimum sample before an off-hours pattern is reportable.
const MIN_EVENTS: usize = 5;

/// Share of activity that must fall outside working hours.
const OFF_HOURS_RATIO: f64 = 0.6;

/// Flags actors whose activity concentrates outside the organization's
/// working-hours window. The window boundaries come from configuration
/// (learned per organization upstream).
pub struct OffHoursDetector;

impl OffHoursDetector {
    fn is_off_hours(hour: u32, start: u32, end: u32) -> bool {
        if start > end {
            // Window wraps midnight, e.g. 20..6.
            hour >= start || hour < end
        } else {
            hour >= start && hour < end
        }
    }
}

impl Detector for OffHoursDetector {
    fn name(&self) -> &'static str {
        "off_hours"
    }

    fn detect(&self, window: &EventWindow, context: &DetectorContext) -> Result<Vec<Detection>> {
        let start = context.config.off_hours_start;
        let end = context.config.off_hours_end;
        let mut detections = Vec::new();

        for (actor, events) in window.events_by_actor() {
            if events.len() < MIN_EVENTS {
                continue;
            }

            let off_hours_count = events
                .iter()
                .filter(|e| Self::is_off_hours(e.timestamp.hour(), start, end))
                .count();
            let ratio = off_hours_count as f64 / events.len() as f64;

            if ratio < OFF_HOURS_RATIO {
                continue;
            }

            detections.push(Detection {
                external_actor_id: actor.to_string(),
                pattern_type: PatternType::OffHours,
                confidence: ratio.min(0.95),
                severity: RiskLevel::Medium,
                evidence: serde_json::json!({
                    "offHoursEvents": off_hours_count,
                    "totalEvents": events.len(),
                    "windowStartHour": start,
                    "windowEndHour": end,
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
    use chrono::{TimeZone, Utc};
    use singura_core::ActionType;

    #[test]
    fn test_midnight_activity_flagged() {
        // All events at 02:00 UTC, inside the 20..6 off-hours window.
        let events: Vec<_> = (0..8)
            .map(|i| {
                event(
                    "night-bot",
                    ActionType::ScriptExecution,
                    Utc.with_ymd_and_hms(2026, 7, 1, 2, i, 0).unwrap(),
                )
            })
            .collect();

        let detections = OffHoursDetector.detect(&window(events), &context()).unwrap();
        assert_eq!(detections.len(), 1);
        assert!(detections[0].confidence >= 0.6);
    }

    #[test]
    fn test_business_hours_activity_clean() {
        let events: Vec<_> = (0..8)
            .map(|i| {
                event(
                    "day-user",
                    ActionType::FileEdit,
                    Utc.with_ymd_and_hms(2026, 7, 1, 10, i, 0).unwrap(),
                )
            })
            .collect();

        let detections = OffHoursDetector.detect(&window(events), &context()).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_wrap_around_window() {
        assert!(OffHoursDetector::is_off_hours(23, 20, 6));
        assert!(OffHoursDetector::is_off_hours(3, 20, 6));
        assert!(!OffHoursDetector::is_off_hours(12, 20, 6));
        // Non-wrapping window.
        assert!(OffHoursDetector::is_off_hours(2, 0, 6));
        assert!(!OffHoursDetector::is_off_hours(9, 0, 6));
    }

    #[test]
    fn test_small_sample_not_flagged() {
        let events: Vec<_> = (0..3)
            .map(|i| {
                event(
                    "sparse",
                    ActionType::FileEdit,
                    Utc.with_ymd_and_hms(2026, 7, 1, 2, i, 0).unwrap(),
                )
            })
            .collect();

        let detections = OffHoursDetector.detect(&window(events), &context()).unwrap();
        assert!(detections.is_empty());
    }
}
