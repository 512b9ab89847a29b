use super::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use crate::error::Result;
use singura_core::{ActivityEvent, RiskLevel};
use std::collections::HashSet;

/// Flags access-widening sequences: permission, ACL, and sharing changes
/// whose scope hints strictly grow over the window. A single widening
/// change is routine; a monotone expansion across several is how scripted
/// privilege creep looks.
pub struct PermissionEscalationDetector;

impl PermissionEscalationDetector {
    /// True when `later` strictly widens `earlier` (superset, not equal).
    fn strictly_widens(earlier: &HashSet<&str>, later: &HashSet<&str>) -> bool {
        later.len() > earlier.len() && earlier.is_subset(later)
    }

    fn scope_set(event: &ActivityEvent) -> HashSet<&str> {
        event.scope_hints.iter().map(String::as_str).collect()
    }
}

impl Detector for PermissionEscalationDetector {
    fn name(&self) -> &'static str {
        "permission_escalation"
    }

    fn detect(&self, window: &EventWindow, _context: &DetectorContext) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();

        for (actor, events) in window.events_by_actor() {
            let widening: Vec<&&ActivityEvent> = events
                .iter()
                .filter(|e| e.action_type.widens_access())
                .collect();

            if widening.len() < 2 {
                continue;
            }

            // Look for a strict scope expansion between consecutive
            // widening changes.
            let mut strict_expansion = false;
            for pair in widening.windows(2) {
                let earlier = Self::scope_set(pair[0]);
                let later = Self::scope_set(pair[1]);
                if !earlier.is_empty() && Self::strictly_widens(&earlier, &later) {
                    strict_expansion = true;
                    break;
                }
            }

            let (confidence, severity) = if strict_expansion {
                (0.85, RiskLevel::High)
            } else if widening.len() >= 3 {
                // Repeated widening without visible scope data is still
                // suspicious, just weaker.
                (0.6, RiskLevel::Medium)
            } else {
                continue;
            };

            detections.push(Detection {
                external_actor_id: actor.to_string(),
                pattern_type: PatternType::PermissionEscalation,
                confidence,
                severity,
                evidence: serde_json::json!({
                    "wideningChanges": widening.len(),
                    "strictExpansion": strict_expansion,
                }),
            });
        }

        Ok(detections)
    }
}
