pub mod correlation;
pub mod detectors;
pub mod error;
pub mod pipeline;
pub mod quality;
pub mod risk;

pub use correlation::{CorrelationEngine, CorrelationSubject, SignalPriors};
pub use detectors::{
    default_detectors, Detection, Detector, DetectorContext, EventWindow, PatternType,
};
pub use error::{DetectionError, Result};
pub use pipeline::{DetectionPipeline, DetectionResult, PipelineOutput, Predicted};
pub use quality::{evaluate, evaluate_drift, GroundTruthLabel, QualityReport};
pub use risk::{RiskScoringEngine, RiskTrend, TrendDirection};
