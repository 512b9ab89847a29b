use super::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use crate::error::Result;
use singura_core::RiskLevel;

/// Minimum events before interval statistics are meaningful.
const MIN_EVENTS: usize = 5;

/// Flags actors whose inter-event intervals show machine-like regularity.
/// The coefficient of variation (stddev / mean) of the gaps is compared
/// against the configured ceiling; humans are bursty, schedulers are not.
pub struct RegularIntervalDetector;

impl Detector for RegularIntervalDetector {
    fn name(&self) -> &'static str {
        "regular_interval"
    }

    fn detect(&self, window: &EventWindow, context: &DetectorContext) -> Result<Vec<Detection>> {
        let ceiling = context.config.interval_variance_threshold;
        let mut detections = Vec::new();

        for (actor, events) in window.events_by_actor() {
            if events.len() < MIN_EVENTS {
                continue;
            }

            let intervals: Vec<f64> = events
                .windows(2)
                .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64)
                .collect();

            let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
            if mean <= 0.0 {
                continue;
            }

            let variance = intervals
                .iter()
                .map(|interval| (interval - mean).powi(2))
                .sum::<f64>()
                / intervals.len() as f64;
            let coefficient_of_variation = variance.sqrt() / mean;

            if coefficient_of_variation >= ceiling {
                continue;
            }

            let confidence = (1.0 - coefficient_of_variation / ceiling).clamp(0.5, 0.95);
            detections.push(Detection {
                external_actor_id: actor.to_string(),
                pattern_type: PatternType::RegularInterval,
                confidence,
                severity: RiskLevel::Low,
                evidence: serde_json::json!({
                    "meanIntervalMs": mean,
                    "coefficientOfVariation": coefficient_of_variation,
                    "samples": intervals.len(),
                }),
            });
        }

        Ok(detections)
    }
}
