//! Detection pipeline: parallel detector execution and factor fusion.
//!
//! Detectors run concurrently over one read-only [`EventWindow`] snapshot.
//! A detector that errors (or panics inside its task) is logged, counted,
//! and skipped; the rest of the pipeline continues. Persistent detector
//! failures degrade quality metrics but never block discovery.

use crate::detectors::{Detection, Detector, DetectorContext, EventWindow, PatternType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use singura_core::{MetricsRegistry, RiskFactor, RiskLevel, Uuid};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Signed score contributed by each pattern family during fusion.
fn factor_for(pattern: PatternType, severity: RiskLevel) -> RiskFactor {
    let score = match pattern {
        PatternType::Velocity => 15,
        PatternType::BatchOperation => 10,
        PatternType::OffHours => 10,
        PatternType::RegularInterval => 10,
        PatternType::AiProvider => 20,
        PatternType::PermissionEscalation => 25,
        PatternType::DataVolume => {
            if severity == RiskLevel::Critical {
                30
            } else {
                20
            }
        }
    };
    RiskFactor::new(pattern.as_str(), score)
}

/// Score relief for externally vouched-for automations.
const VERIFIED_PUBLISHER_RELIEF: i32 = -30;
const MARKETPLACE_RELIEF: i32 = -30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicted {
    Malicious,
    Legitimate,
}

/// Per-detector prediction consumed by the quality subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub automation_id: Uuid,
    pub predicted: Predicted,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub detector_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Fused factor bundles keyed by automation id.
    pub factors_by_automation: HashMap<Uuid, Vec<RiskFactor>>,
    /// Per-detector predictions for the quality loop.
    pub detection_results: Vec<DetectionResult>,
    /// Detections on actors with no catalog entry; kept for fingerprinting
    /// and later correlation.
    pub unmatched: Vec<Detection>,
    /// Names of detectors that failed this window.
    pub failed_detectors: Vec<String>,
}

pub struct DetectionPipeline {
    detectors: Vec<Arc<dyn Detector>>,
    metrics: Arc<MetricsRegistry>,
}

impl DetectionPipeline {
    pub fn new(detectors: Vec<Arc<dyn Detector>>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { detectors, metrics }
    }

    pub fn with_defaults(metrics: Arc<MetricsRegistry>) -> Self {
        Self::new(crate::detectors::default_detectors(), metrics)
    }

    /// Run every detector concurrently over the window, then fuse.
    pub async fn run(&self, window: EventWindow, context: DetectorContext) -> PipelineOutput {
        let window = Arc::new(window);
        let context = Arc::new(context);

        let mut handles = Vec::with_capacity(self.detectors.len());
        for detector in &self.detectors {
            let detector = detector.clone();
            let window = window.clone();
            let context = context.clone();
            let name = detector.name();
            handles.push((
                name,
                tokio::task::spawn_blocking(move || detector.detect(&window, &context)),
            ));
        }

        let mut detections = Vec::new();
        let mut failed_detectors = Vec::new();

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(found)) => {
                    debug!(detector = name, count = found.len(), "Detector completed");
                    detections.extend(found.into_iter().map(|d| (name, d)));
                }
                Ok(Err(e)) => {
                    error!(detector = name, error = %e, "Detector failed; skipping");
                    self.metrics
                        .detector_failures
                        .with_label_values(&[name])
                        .inc();
                    failed_detectors.push(name.to_string());
                }
                Err(join_error) => {
                    error!(detector = name, error = %join_error, "Detector panicked; skipping");
                    self.metrics
                        .detector_failures
                        .with_label_values(&[name])
                        .inc();
                    failed_detectors.push(name.to_string());
                }
            }
        }

        let mut output = Self::fuse(detections, &context);
        output.failed_detectors = failed_detectors;
        output
    }

    /// Group detections per automation and condense them into signed risk
    /// factors plus per-detector predictions.
    fn fuse(detections: Vec<(&'static str, Detection)>, context: &DetectorContext) -> PipelineOutput {
        let now = Utc::now();
        let mut output = PipelineOutput::default();

        // (automation, detector) -> best confidence
        let mut best_confidence: HashMap<(Uuid, &'static str), f64> = HashMap::new();
        // automation -> pattern -> strongest detection
        let mut strongest: HashMap<Uuid, HashMap<PatternType, (f64, RiskLevel)>> = HashMap::new();

        for (detector_name, detection) in detections {
            let Some(automation) = context.automation_by_actor(&detection.external_actor_id)
            else {
                output.unmatched.push(detection);
                continue;
            };

            let entry = best_confidence
                .entry((automation.id, detector_name))
                .or_insert(0.0);
            *entry = entry.max(detection.confidence);

            let patterns = strongest.entry(automation.id).or_default();
            let slot = patterns
                .entry(detection.pattern_type)
                .or_insert((0.0, detection.severity));
            if detection.confidence > slot.0 {
                *slot = (detection.confidence, detection.severity);
            }
        }

        for ((automation_id, detector_name), confidence) in best_confidence {
            output.detection_results.push(DetectionResult {
                automation_id,
                predicted: Predicted::Malicious,
                confidence,
                detector_name: detector_name.to_string(),
                timestamp: now,
            });
        }

        for (automation_id, patterns) in strongest {
            let mut factors: Vec<RiskFactor> = patterns
                .into_iter()
                .map(|(pattern, (_confidence, severity))| factor_for(pattern, severity))
                .collect();

            // Negative factors from what discovery already knows about the
            // automation.
            if let Some(automation) = context.automations.iter().find(|a| a.id == automation_id) {
                if automation.detection_metadata.verified_publisher == Some(true) {
                    factors.push(
                        RiskFactor::new("verified_publisher", VERIFIED_PUBLISHER_RELIEF)
                            .with_description("publisher identity verified by the platform"),
                    );
                }
                if automation.detection_metadata.well_known_integration == Some(true) {
                    factors.push(
                        RiskFactor::new("marketplace_verified", MARKETPLACE_RELIEF)
                            .with_description("listed in the platform app directory"),
                    );
                }
            }

            factors.sort_by(|a, b| a.factor_type.cmp(&b.factor_type));
            output.factors_by_automation.insert(automation_id, factors);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testutil::{config, event};
    use crate::detectors::{Detector, EventWindow};
    use crate::error::{DetectionError, Result as DetectionResultT};
    use chrono::Duration;
    use singura_core::{
        ActionType, AutomationType, DetectionMetadata, DiscoveredAutomation, PlatformMetadata,
        RiskScoreEntry, RiskTrigger,
    };

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(
            &self,
            _window: &EventWindow,
            _context: &DetectorContext,
        ) -> DetectionResultT<Vec<Detection>> {
            Err(DetectionError::DetectorFailed {
                detector: "failing".to_string(),
                detail: "synthetic".to_string(),
            })
        }
    }

    fn automation(external_id: &str, verified: bool) -> DiscoveredAutomation {
        DiscoveredAutomation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            platform_connection_id: Uuid::new_v4(),
            discovery_run_id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            name: external_id.to_string(),
            description: None,
            automation_type: AutomationType::Bot,
            platform_metadata: PlatformMetadata::empty(),
            detection_metadata: DetectionMetadata {
                verified_publisher: Some(verified),
                ..Default::default()
            },
            permissions_required: Vec::new(),
            risk_score_history: vec![RiskScoreEntry {
                timestamp: Utc::now(),
                score: 10,
                level: RiskLevel::Low,
                factors: Vec::new(),
                trigger: RiskTrigger::InitialDiscovery,
                rapid_change: false,
            }],
            first_discovered_at: Utc::now(),
            last_triggered_at: None,
        }
    }

    fn metrics() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new("singura_test_pipeline").unwrap())
    }

    #[tokio::test]
    async fn test_failing_detector_is_isolated() {
        let pipeline = DetectionPipeline::new(
            vec![
                Arc::new(FailingDetector),
                Arc::new(crate::detectors::VelocityDetector),
            ],
            metrics(),
        );

        let start = Utc::now();
        let events: Vec<_> = (0..30)
            .map(|i| {
                event(
                    "bot-1",
                    ActionType::FileEdit,
                    start + Duration::milliseconds(i * 100),
                )
            })
            .collect();

        let catalog = automation("bot-1", false);
        let context = DetectorContext {
            automations: Arc::new(vec![catalog.clone()]),
            config: config(),
        };
        let window = EventWindow::new(
            catalog.organization_id,
            catalog.platform_connection_id,
            start,
            start + Duration::seconds(10),
            events,
        );

        let output = pipeline.run(window, context).await;

        assert_eq!(output.failed_detectors, vec!["failing".to_string()]);
        // Velocity still produced its factor bundle.
        let factors = output.factors_by_automation.get(&catalog.id).unwrap();
        assert!(factors.iter().any(|f| f.factor_type == "velocity"));
    }

    #[tokio::test]
    async fn test_verified_publisher_contributes_relief() {
        let pipeline = DetectionPipeline::new(
            vec![Arc::new(crate::detectors::VelocityDetector)],
            metrics(),
        );

        let start = Utc::now();
        let events: Vec<_> = (0..30)
            .map(|i| {
                event(
                    "verified-bot",
                    ActionType::FileEdit,
                    start + Duration::milliseconds(i * 100),
                )
            })
            .collect();

        let catalog = automation("verified-bot", true);
        let context = DetectorContext {
            automations: Arc::new(vec![catalog.clone()]),
            config: config(),
        };
        let window = EventWindow::new(
            catalog.organization_id,
            catalog.platform_connection_id,
            start,
            start + Duration::seconds(10),
            events,
        );

        let output = pipeline.run(window, context).await;
        let factors = output.factors_by_automation.get(&catalog.id).unwrap();
        let relief = factors
            .iter()
            .find(|f| f.factor_type == "verified_publisher")
            .unwrap();
        assert_eq!(relief.score, -30);
    }

    #[tokio::test]
    async fn test_unknown_actor_lands_in_unmatched() {
        let pipeline = DetectionPipeline::new(
            vec![Arc::new(crate::detectors::VelocityDetector)],
            metrics(),
        );

        let start = Utc::now();
        let events: Vec<_> = (0..30)
            .map(|i| {
                event(
                    "ghost",
                    ActionType::FileEdit,
                    start + Duration::milliseconds(i * 100),
                )
            })
            .collect();

        let context = DetectorContext {
            automations: Arc::new(Vec::new()),
            config: config(),
        };
        let window = EventWindow::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            start,
            start + Duration::seconds(10),
            events,
        );

        let output = pipeline.run(window, context).await;
        assert!(output.factors_by_automation.is_empty());
        assert_eq!(output.unmatched.len(), 1);
        assert_eq!(output.unmatched[0].external_actor_id, "ghost");
    }
}
