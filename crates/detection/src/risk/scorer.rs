//! Risk scoring engine.
//!
//! Computes new history entries from factor bundles, classifies the trigger
//! by inspecting which factors changed, and enforces the append rules:
//! equal scores do not append unless the trigger is `manual_reassessment`
//! or `detector_update` (those preserve the audit trail), and a swing of
//! more than 50 points marks the entry as a rapid change.

use chrono::Utc;
use singura_core::{
    events::{RealtimeMessage, RealtimePayload},
    DiscoveredAutomation, EventBus, RiskFactor, RiskLevel, RiskScoreEntry, RiskTrigger, Uuid,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Swing beyond which an entry is flagged as a rapid change.
const RAPID_CHANGE_DELTA: i32 = 50;

/// Factor families used for trigger classification.
const ACTIVITY_FAMILY: &[&str] = &["activity", "velocity", "batch_operation", "data_volume"];
const PERMISSION_FAMILY: &[&str] = &["permission", "permission_escalation", "acl_change"];

pub struct RiskScoringEngine {
    bus: Arc<EventBus>,
}

impl RiskScoringEngine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Entry for a newly discovered automation. Every automation gets one;
    /// this is the `initial_discovery` history floor.
    pub fn initial_entry(factors: Vec<RiskFactor>) -> RiskScoreEntry {
        let score = clamp_score(factors.iter().map(|f| f.score).sum());
        RiskScoreEntry {
            timestamp: Utc::now(),
            score,
            level: RiskLevel::from_score(score),
            factors,
            trigger: RiskTrigger::InitialDiscovery,
            rapid_change: false,
        }
    }

    /// Assess a detector-produced factor bundle against the automation's
    /// current state. Returns the entry to append, or `None` when nothing
    /// changed and the trigger does not force an append.
    pub fn assess(
        &self,
        organization_id: Uuid,
        automation: &DiscoveredAutomation,
        factors: Vec<RiskFactor>,
    ) -> Option<RiskScoreEntry> {
        let Some(previous) = automation.current_risk() else {
            // No history yet; the caller should be using initial_entry, but
            // never lose the assessment.
            return Some(Self::initial_entry(factors));
        };

        // An identical bundle is not a detector update at all; replaying
        // detection on unchanged data appends nothing.
        if factors_equivalent(&previous.factors, &factors) {
            debug!(
                automation_id = %automation.id,
                "Factor bundle unchanged; not appending"
            );
            return None;
        }

        let delta = factor_delta(&previous.factors, &factors);
        let new_score = clamp_score(previous.score as i32 + delta);
        let trigger = classify_trigger(&previous.factors, &factors);

        if new_score == previous.score && !trigger.always_appends() {
            debug!(
                automation_id = %automation.id,
                score = new_score,
                "Score unchanged; not appending"
            );
            return None;
        }

        let entry = self.build_entry(previous, new_score, factors, trigger);
        self.emit(organization_id, automation, previous.score, &entry);
        Some(entry)
    }

    /// Manual reassessment: the caller supplies the complete replacement
    /// factor set and the score is recomputed from it. Always appends.
    pub fn reassess_manual(
        &self,
        organization_id: Uuid,
        automation: &DiscoveredAutomation,
        factors: Vec<RiskFactor>,
    ) -> RiskScoreEntry {
        let previous_score = automation.current_score();
        let new_score = clamp_score(factors.iter().map(|f| f.score).sum());

        let previous = automation.current_risk();
        let entry = RiskScoreEntry {
            timestamp: Utc::now(),
            score: new_score,
            level: RiskLevel::from_score(new_score),
            factors,
            trigger: RiskTrigger::ManualReassessment,
            rapid_change: (new_score as i32 - previous_score as i32).abs() > RAPID_CHANGE_DELTA,
        };

        if previous.is_some() {
            self.emit(organization_id, automation, previous_score, &entry);
        }

        info!(
            automation_id = %automation.id,
            old_score = previous_score,
            new_score,
            "Manual risk reassessment"
        );
        entry
    }

    fn build_entry(
        &self,
        previous: &RiskScoreEntry,
        new_score: u8,
        factors: Vec<RiskFactor>,
        trigger: RiskTrigger,
    ) -> RiskScoreEntry {
        RiskScoreEntry {
            timestamp: Utc::now(),
            score: new_score,
            level: RiskLevel::from_score(new_score),
            factors,
            trigger,
            rapid_change: (new_score as i32 - previous.score as i32).abs() > RAPID_CHANGE_DELTA,
        }
    }

    fn emit(
        &self,
        organization_id: Uuid,
        automation: &DiscoveredAutomation,
        old_score: u8,
        entry: &RiskScoreEntry,
    ) {
        self.bus.publish(RealtimeMessage::new(
            organization_id,
            RealtimePayload::RiskScoreUpdated {
                automation_id: automation.id,
                old_score,
                new_score: entry.score,
                reason: entry.trigger.as_str().to_string(),
            },
        ));

        // High alerts require both a rapid swing and a high/critical level.
        if entry.rapid_change
            && matches!(entry.level, RiskLevel::High | RiskLevel::Critical)
        {
            let detection_patterns: Vec<String> = entry
                .factors
                .iter()
                .filter(|f| f.score > 0)
                .map(|f| f.factor_type.clone())
                .collect();

            self.bus.publish(RealtimeMessage::new(
                organization_id,
                RealtimePayload::RiskHighAlert {
                    automation_id: automation.id,
                    risk_score: entry.score,
                    risk_level: entry.level,
                    detection_patterns,
                },
            ));
        }
    }
}

fn clamp_score(raw: i32) -> u8 {
    raw.clamp(0, 100) as u8
}

/// True when both bundles carry the same factor types with the same scores.
fn factors_equivalent(previous: &[RiskFactor], new: &[RiskFactor]) -> bool {
    if previous.len() != new.len() {
        return false;
    }
    let previous_by_type: HashMap<&str, i32> = previous
        .iter()
        .map(|f| (f.factor_type.as_str(), f.score))
        .collect();
    new.iter()
        .all(|f| previous_by_type.get(f.factor_type.as_str()) == Some(&f.score))
}

/// Sum of per-type score changes across the union of the previous entry's
/// factors and the new bundle; a type missing on either side counts as 0.
/// Factors present in both with the same score contribute nothing, so
/// re-running detection on unchanged data is a no-op, and a factor that
/// stops firing contributes its full removal so scores come back down.
fn factor_delta(previous: &[RiskFactor], new: &[RiskFactor]) -> i32 {
    let previous_by_type: HashMap<&str, i32> = previous
        .iter()
        .map(|f| (f.factor_type.as_str(), f.score))
        .collect();
    let new_by_type: HashMap<&str, i32> = new
        .iter()
        .map(|f| (f.factor_type.as_str(), f.score))
        .collect();

    let mut delta: i32 = new_by_type
        .iter()
        .map(|(factor_type, score)| {
            score - previous_by_type.get(factor_type).copied().unwrap_or(0)
        })
        .sum();

    for (factor_type, score) in &previous_by_type {
        if !new_by_type.contains_key(factor_type) {
            delta -= score;
        }
    }

    delta
}

/// Classify the cause of a score change by the factors that moved.
fn classify_trigger(previous: &[RiskFactor], new: &[RiskFactor]) -> RiskTrigger {
    let previous_by_type: HashMap<&str, i32> = previous
        .iter()
        .map(|f| (f.factor_type.as_str(), f.score))
        .collect();

    let increased = |family: &[&str]| {
        new.iter().any(|f| {
            family.contains(&f.factor_type.as_str())
                && f.score > previous_by_type.get(f.factor_type.as_str()).copied().unwrap_or(0)
        })
    };

    if increased(ACTIVITY_FAMILY) {
        RiskTrigger::ActivitySpike
    } else if increased(PERMISSION_FAMILY) {
        RiskTrigger::PermissionChange
    } else {
        // A new pattern appeared, a factor receded, or relief was applied.
        RiskTrigger::DetectorUpdate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use singura_core::{
        AutomationType, DetectionMetadata, MetricsRegistry, PlatformMetadata,
    };
    use tokio::sync::broadcast::error::TryRecvError;

    fn engine() -> (RiskScoringEngine, Arc<EventBus>) {
        let metrics = Arc::new(MetricsRegistry::new("singura_test_scorer").unwrap());
        let bus = Arc::new(EventBus::new(1024, metrics));
        (RiskScoringEngine::new(bus.clone()), bus)
    }

    fn automation_with_history(entries: Vec<RiskScoreEntry>) -> DiscoveredAutomation {
        DiscoveredAutomation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            platform_connection_id: Uuid::new_v4(),
            discovery_run_id: Uuid::new_v4(),
            external_id: "ext-1".to_string(),
            name: "CI Bot".to_string(),
            description: None,
            automation_type: AutomationType::Bot,
            platform_metadata: PlatformMetadata::empty(),
            detection_metadata: DetectionMetadata::default(),
            permissions_required: Vec::new(),
            risk_score_history: entries,
            first_discovered_at: Utc::now(),
            last_triggered_at: None,
        }
    }

    fn entry(score: u8, trigger: RiskTrigger, factors: Vec<RiskFactor>) -> RiskScoreEntry {
        RiskScoreEntry {
            timestamp: Utc::now(),
            score,
            level: RiskLevel::from_score(score),
            factors,
            trigger,
            rapid_change: false,
        }
    }

    #[tokio::test]
    async fn test_activity_spike_escalation() {
        // History [{score: 45, initial_discovery}] + activity factor +27
        // must yield {score: 72, level high, trigger activity_spike}.
        let (engine, bus) = engine();
        let automation = automation_with_history(vec![entry(
            45,
            RiskTrigger::InitialDiscovery,
            vec![RiskFactor::new("base", 45)],
        )]);
        let mut subscription = bus.subscribe(automation.organization_id);

        let factors = vec![
            RiskFactor::new("base", 45),
            RiskFactor::new("activity", 27),
        ];
        let new_entry = engine
            .assess(automation.organization_id, &automation, factors)
            .unwrap();

        assert_eq!(new_entry.score, 72);
        assert_eq!(new_entry.level, RiskLevel::High);
        assert_eq!(new_entry.trigger, RiskTrigger::ActivitySpike);
        assert!(!new_entry.rapid_change);

        // A score_updated event and, because the change was not rapid, no
        // high_alert.
        let first = subscription.try_recv().unwrap();
        assert!(matches!(
            first.payload,
            RealtimePayload::RiskScoreUpdated {
                old_score: 45,
                new_score: 72,
                ..
            }
        ));
        assert!(matches!(subscription.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_manual_reassessment_suppresses_false_positive() {
        // A CI/CD bot at 78 (high) is manually reassessed with verified
        // integration relief; the recomputed set lands at 22 (low) and the
        // history grows to 2 entries.
        let (engine, _bus) = engine();
        let automation = automation_with_history(vec![entry(
            78,
            RiskTrigger::InitialDiscovery,
            vec![
                RiskFactor::new("velocity", 30),
                RiskFactor::new("ai_provider", 20),
                RiskFactor::new("permission_escalation", 28),
            ],
        )]);

        let reassessed = engine.reassess_manual(
            automation.organization_id,
            &automation,
            vec![
                RiskFactor::new("velocity", 27),
                RiskFactor::new("data_volume", 25),
                RiskFactor::new("verified_integration", -30)
                    .with_description("reviewed and approved by the security team"),
            ],
        );

        assert_eq!(reassessed.score, 22);
        assert_eq!(reassessed.level, RiskLevel::Low);
        assert_eq!(reassessed.trigger, RiskTrigger::ManualReassessment);

        let mut history = automation.risk_score_history.clone();
        history.push(reassessed);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_score_does_not_append() {
        let (engine, _bus) = engine();
        let factors = vec![RiskFactor::new("ai_provider", 20)];
        let automation = automation_with_history(vec![entry(
            20,
            RiskTrigger::InitialDiscovery,
            factors.clone(),
        )]);

        // Identical factor bundle: delta 0 and the trigger classification
        // sees no increase, so nothing is appended.
        assert!(engine
            .assess(automation.organization_id, &automation, factors)
            .is_none());
    }

    #[tokio::test]
    async fn test_rapid_change_emits_high_alert() {
        let (engine, bus) = engine();
        let automation = automation_with_history(vec![entry(
            10,
            RiskTrigger::InitialDiscovery,
            vec![RiskFactor::new("base", 10)],
        )]);
        let mut subscription = bus.subscribe(automation.organization_id);

        let factors = vec![
            RiskFactor::new("base", 10),
            RiskFactor::new("permission_escalation", 45),
            RiskFactor::new("data_volume", 30),
        ];
        let new_entry = engine
            .assess(automation.organization_id, &automation, factors)
            .unwrap();

        assert_eq!(new_entry.score, 85);
        assert_eq!(new_entry.level, RiskLevel::Critical);
        assert!(new_entry.rapid_change);

        let mut saw_alert = false;
        while let Ok(message) = subscription.try_recv() {
            if let RealtimePayload::RiskHighAlert {
                risk_score,
                detection_patterns,
                ..
            } = message.payload
            {
                assert_eq!(risk_score, 85);
                assert!(detection_patterns.contains(&"permission_escalation".to_string()));
                saw_alert = true;
            }
        }
        assert!(saw_alert);
    }

    #[tokio::test]
    async fn test_scores_clamped_to_bounds() {
        let (engine, _bus) = engine();
        let automation = automation_with_history(vec![entry(
            90,
            RiskTrigger::InitialDiscovery,
            vec![RiskFactor::new("base", 90)],
        )]);

        let over = engine
            .assess(
                automation.organization_id,
                &automation,
                vec![RiskFactor::new("base", 90), RiskFactor::new("data_volume", 50)],
            )
            .unwrap();
        assert_eq!(over.score, 100);

        let under = engine.reassess_manual(
            automation.organization_id,
            &automation,
            vec![RiskFactor::new("verified_integration", -120)],
        );
        assert_eq!(under.score, 0);
    }

    #[test]
    fn test_permission_trigger_classification() {
        let previous = vec![RiskFactor::new("base", 40)];
        let new = vec![
            RiskFactor::new("base", 40),
            RiskFactor::new("permission_escalation", 25),
        ];
        assert_eq!(
            classify_trigger(&previous, &new),
            RiskTrigger::PermissionChange
        );
    }

    #[test]
    fn test_receding_factor_is_detector_update() {
        let previous = vec![RiskFactor::new("velocity", 15)];
        let new = vec![RiskFactor::new("velocity", 10)];
        assert_eq!(classify_trigger(&previous, &new), RiskTrigger::DetectorUpdate);
    }

    #[tokio::test]
    async fn test_vanished_factor_lowers_score() {
        // A pattern that stops firing must give its contribution back:
        // [velocity 15, permission_escalation 25] at 40, next window only
        // sees velocity, so the score returns to 15.
        let (engine, _bus) = engine();
        let automation = automation_with_history(vec![entry(
            40,
            RiskTrigger::InitialDiscovery,
            vec![
                RiskFactor::new("velocity", 15),
                RiskFactor::new("permission_escalation", 25),
            ],
        )]);

        let new_entry = engine
            .assess(
                automation.organization_id,
                &automation,
                vec![RiskFactor::new("velocity", 15)],
            )
            .unwrap();

        assert_eq!(new_entry.score, 15);
        assert_eq!(new_entry.level, RiskLevel::Low);
        assert_eq!(new_entry.trigger, RiskTrigger::DetectorUpdate);
    }

    #[test]
    fn test_factor_delta_over_type_union() {
        let previous = vec![
            RiskFactor::new("velocity", 15),
            RiskFactor::new("permission_escalation", 25),
        ];

        // Same types, same scores: no movement.
        assert_eq!(factor_delta(&previous, &previous), 0);
        // A type vanishing subtracts its full score.
        assert_eq!(
            factor_delta(&previous, &[RiskFactor::new("velocity", 15)]),
            -25
        );
        // A new type adds on top of a vanished one.
        assert_eq!(
            factor_delta(
                &previous,
                &[
                    RiskFactor::new("velocity", 15),
                    RiskFactor::new("data_volume", 20),
                ],
            ),
            -5
        );
    }
}
