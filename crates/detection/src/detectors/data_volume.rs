use super::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use crate::error::Result;
use singura_core::{ActionType, RiskLevel};

/// Flags actors moving more data than the learned baseline. An explicit
/// `data_exfiltration` action in the window raises severity regardless of
/// the byte count.
pub struct DataVolumeDetector;

impl Detector for DataVolumeDetector {
    fn name(&self) -> &'static str {
        "data_volume"
    }

    fn detect(&self, window: &EventWindow, context: &DetectorContext) -> Result<Vec<Detection>> {
        let baseline = context.config.data_volume_baseline_bytes;
        let mut detections = Vec::new();

        for (actor, events) in window.events_by_actor() {
            let total_bytes: i64 = events.iter().filter_map(|e| e.payload_bytes).sum();
            let exfiltration_actions = events
                .iter()
                .filter(|e| e.action_type == ActionType::DataExfiltration)
                .count();

            let over_baseline = total_bytes > baseline;
            if !over_baseline && exfiltration_actions == 0 {
                continue;
            }

            let (confidence, severity) = match (over_baseline, exfiltration_actions > 0) {
                (true, true) => (0.9, RiskLevel::Critical),
                (true, false) => (0.7, RiskLevel::High),
                (false, true) => (0.65, RiskLevel::High),
                (false, false) => unreachable!(),
            };

            detections.push(Detection {
                external_actor_id: actor.to_string(),
                pattern_type: PatternType::DataVolume,
                confidence,
                severity,
                evidence: serde_json::json!({
                    "totalBytes": total_bytes,
                    "baselineBytes": baseline,
                    "exfiltrationActions": exfiltration_actions,
                }),
            });
        }

        Ok(detections)
    }
}
