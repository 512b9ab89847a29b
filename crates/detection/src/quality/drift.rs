//! Baseline drift detection.
//!
//! Current metrics are compared against the latest baseline; degradations
//! past the per-metric thresholds raise alerts, improvements never do.
//! Evaluation is pure: the same inputs always produce the same alerts.

use super::metrics::QualityReport;
use serde::{Deserialize, Serialize};
use singura_core::DetectorBaseline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftMetric {
    Precision,
    Recall,
    F1,
}

impl DriftMetric {
    fn as_str(&self) -> &'static str {
        match self {
            DriftMetric::Precision => "precision",
            DriftMetric::Recall => "recall",
            DriftMetric::F1 => "f1",
        }
    }

    /// (warning, critical) drop thresholds, as absolute metric deltas.
    fn thresholds(&self) -> (f64, f64) {
        match self {
            DriftMetric::Precision => (0.05, 0.07),
            DriftMetric::Recall => (0.03, 0.05),
            DriftMetric::F1 => (0.05, 0.07),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub metric: DriftMetric,
    pub baseline_value: f64,
    pub current_value: f64,
    /// Signed delta (current − baseline); negative on degradation.
    pub percentage_change: f64,
    pub severity: DriftSeverity,
    pub message: String,
}

/// Compare current metrics against a baseline. Returns one alert per
/// degraded metric, empty when everything holds or improved.
pub fn evaluate_drift(baseline: &DetectorBaseline, current: &QualityReport) -> Vec<DriftAlert> {
    let comparisons = [
        (DriftMetric::Precision, baseline.precision, current.precision),
        (DriftMetric::Recall, baseline.recall, current.recall),
        (DriftMetric::F1, baseline.f1, current.f1),
    ];

    let mut alerts = Vec::new();

    for (metric, baseline_value, current_value) in comparisons {
        let change = current_value - baseline_value;
        if change >= 0.0 {
            continue;
        }

        let drop = -change;
        let (warning, critical) = metric.thresholds();

        let severity = if drop >= critical {
            DriftSeverity::Critical
        } else if drop >= warning {
            DriftSeverity::Warning
        } else {
            continue;
        };

        alerts.push(DriftAlert {
            metric,
            baseline_value,
            current_value,
            percentage_change: change,
            severity,
            message: format!(
                "{} {} dropped from {:.3} to {:.3} against baseline {} ({:+.3})",
                baseline.detector_name,
                metric.as_str(),
                baseline_value,
                current_value,
                baseline.version,
                change,
            ),
        });
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::metrics::ConfusionMatrix;
    use chrono::Utc;
    use uuid::Uuid;

    fn baseline(precision: f64, recall: f64, f1: f64) -> DetectorBaseline {
        DetectorBaseline {
            id: Uuid::new_v4(),
            detector_name: "velocity".to_string(),
            version: "v7".to_string(),
            precision,
            recall,
            f1,
            sample_size: 200,
            below_sample_floor: false,
            timestamp: Utc::now(),
        }
    }

    fn report(precision: f64, recall: f64, f1: f64) -> QualityReport {
        QualityReport {
            precision,
            recall,
            f1,
            accuracy: 0.9,
            confusion_matrix: ConfusionMatrix::default(),
            false_positives: Vec::new(),
            false_negatives: Vec::new(),
            sample_size: 200,
        }
    }

    #[test]
    fn test_precision_collapse_is_critical() {
        // 0.92 -> 0.84 is a drop of 0.08: critical, change <= -0.07.
        let alerts = evaluate_drift(&baseline(0.92, 0.9, 0.91), &report(0.84, 0.9, 0.91));

        let precision_alert = alerts
            .iter()
            .find(|a| a.metric == DriftMetric::Precision)
            .unwrap();
        assert_eq!(precision_alert.severity, DriftSeverity::Critical);
        assert!(precision_alert.percentage_change <= -0.07);
        assert!(precision_alert.message.contains("precision"));
    }

    #[test]
    fn test_moderate_recall_drop_is_warning() {
        // Recall 0.90 -> 0.86: drop 0.04, between the 0.03 warning and
        // 0.05 critical thresholds.
        let alerts = evaluate_drift(&baseline(0.9, 0.90, 0.9), &report(0.9, 0.86, 0.9));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, DriftMetric::Recall);
        assert_eq!(alerts[0].severity, DriftSeverity::Warning);
    }

    #[test]
    fn test_improvement_never_alerts() {
        let alerts = evaluate_drift(&baseline(0.8, 0.8, 0.8), &report(0.95, 0.92, 0.93));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_small_wobble_below_thresholds_silent() {
        let alerts = evaluate_drift(&baseline(0.9, 0.9, 0.9), &report(0.88, 0.88, 0.88));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let b = baseline(0.92, 0.9, 0.91);
        let r = report(0.84, 0.85, 0.84);
        assert_eq!(evaluate_drift(&b, &r), evaluate_drift(&b, &r));
    }
}
