//! Detection quality loop: precision/recall metrics, versioned baselines,
//! and drift alerting.

pub mod baseline;
pub mod drift;
pub mod metrics;

pub use baseline::{
    baseline_from_report, BaselineRepository, InMemoryBaselineRepository,
    PostgresBaselineRepository, MAX_BASELINES_PER_DETECTOR, PRIMARY_SAMPLE_FLOOR,
};
pub use drift::{evaluate_drift, DriftAlert, DriftMetric, DriftSeverity};
pub use metrics::{evaluate, ConfusionMatrix, GroundTruthLabel, QualityReport};
