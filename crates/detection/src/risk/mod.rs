//! Risk scoring: entry computation, trigger classification, history queries.

pub mod history;
pub mod scorer;

pub use history::{RiskTrend, TrendDirection};
pub use scorer::RiskScoringEngine;
