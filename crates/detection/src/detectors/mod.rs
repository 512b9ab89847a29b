//! Detector set.
//!
//! Every detector is a deterministic function over a read-only
//! [`EventWindow`] snapshot plus reference state, emitting zero or more
//! [`Detection`]s. Detectors hold no mutable state and may therefore run
//! concurrently over the same window.

pub mod ai_provider;
pub mod batch;
pub mod data_volume;
pub mod interval;
pub mod off_hours;
pub mod permission;
pub mod velocity;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use singura_core::{
    config::DetectionConfig, ActivityEvent, DiscoveredAutomation, RiskLevel, Uuid,
};
use std::collections::HashMap;
use std::sync::Arc;

pub use ai_provider::AiProviderDetector;
pub use batch::BatchOperationDetector;
pub use data_volume::DataVolumeDetector;
pub use interval::RegularIntervalDetector;
pub use off_hours::OffHoursDetector;
pub use permission::PermissionEscalationDetector;
pub use velocity::VelocityDetector;

/// Pattern families the detectors can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Velocity,
    BatchOperation,
    OffHours,
    RegularInterval,
    AiProvider,
    PermissionEscalation,
    DataVolume,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Velocity => "velocity",
            PatternType::BatchOperation => "batch_operation",
            PatternType::OffHours => "off_hours",
            PatternType::RegularInterval => "regular_interval",
            PatternType::AiProvider => "ai_provider",
            PatternType::PermissionEscalation => "permission_escalation",
            PatternType::DataVolume => "data_volume",
        }
    }
}

/// One finding over a window, attributed to an external actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub external_actor_id: String,
    pub pattern_type: PatternType,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub severity: RiskLevel,
    pub evidence: serde_json::Value,
}

/// Read-only snapshot of one connection's activity for a bounded window.
#[derive(Debug, Clone)]
pub struct EventWindow {
    pub organization_id: Uuid,
    pub connection_id: Uuid,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub events: Arc<Vec<ActivityEvent>>,
}

impl EventWindow {
    pub fn new(
        organization_id: Uuid,
        connection_id: Uuid,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        events: Vec<ActivityEvent>,
    ) -> Self {
        Self {
            organization_id,
            connection_id,
            since,
            until,
            events: Arc::new(events),
        }
    }

    /// Events grouped per actor, chronologically sorted within each group.
    pub fn events_by_actor(&self) -> HashMap<&str, Vec<&ActivityEvent>> {
        let mut grouped: HashMap<&str, Vec<&ActivityEvent>> = HashMap::new();
        for event in self.events.iter() {
            grouped
                .entry(event.external_actor_id.as_str())
                .or_default()
                .push(event);
        }
        for events in grouped.values_mut() {
            events.sort_by_key(|e| e.timestamp);
        }
        grouped
    }
}

/// Reference state shared by all detectors: the automation catalog for the
/// connection and the tuned thresholds.
#[derive(Clone)]
pub struct DetectorContext {
    pub automations: Arc<Vec<DiscoveredAutomation>>,
    pub config: DetectionConfig,
}

impl DetectorContext {
    pub fn automation_by_actor(&self, external_actor_id: &str) -> Option<&DiscoveredAutomation> {
        self.automations
            .iter()
            .find(|a| a.external_id == external_actor_id)
    }
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, window: &EventWindow, context: &DetectorContext) -> Result<Vec<Detection>>;
}

/// The full production detector set.
pub fn default_detectors() -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(VelocityDetector),
        Arc::new(BatchOperationDetector),
        Arc::new(OffHoursDetector),
        Arc::new(RegularIntervalDetector),
        Arc::new(AiProviderDetector::new()),
        Arc::new(PermissionEscalationDetector),
        Arc::new(DataVolumeDetector),
    ]
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use singura_core::ActionType;

    pub fn config() -> DetectionConfig {
        DetectionConfig {
            velocity_events_per_second: 2.0,
            batch_min_actions: 10,
            batch_window_seconds: 60,
            interval_variance_threshold: 0.15,
            off_hours_start: 20,
            off_hours_end: 6,
            data_volume_baseline_bytes: 50 * 1024 * 1024,
        }
    }

    pub fn context() -> DetectorContext {
        DetectorContext {
            automations: Arc::new(Vec::new()),
            config: config(),
        }
    }

    pub fn event(
        actor: &str,
        action_type: ActionType,
        timestamp: DateTime<Utc>,
    ) -> ActivityEvent {
        ActivityEvent {
            external_actor_id: actor.to_string(),
            action_type,
            timestamp,
            resource: None,
            scope_hints: Vec::new(),
            payload_bytes: None,
        }
    }

    pub fn window(events: Vec<ActivityEvent>) -> EventWindow {
        let since = events
            .iter()
            .map(|e| e.timestamp)
            .min()
            .unwrap_or_else(Utc::now);
        let until = events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or_else(Utc::now);
        EventWindow::new(Uuid::new_v4(), Uuid::new_v4(), since, until, events)
    }
}
