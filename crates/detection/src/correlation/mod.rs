//! Fingerprint-based cross-platform correlation.

pub mod fingerprint;
pub mod linker;

pub use fingerprint::{
    ai_provider_fingerprint, behavior_fingerprint, quantize_schedule, timing_fingerprint,
};
pub use linker::{CorrelationEngine, CorrelationSubject, SignalPriors};
