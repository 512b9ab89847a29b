//! Queries over an automation's stored risk history.
//!
//! History slices are chronologically ordered and append-only; all
//! functions here are pure reads over that invariant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use singura_core::{RiskLevel, RiskScoreEntry};

/// Direction threshold in score points.
const TREND_THRESHOLD: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskTrend {
    pub first_score: u8,
    pub last_score: u8,
    pub direction: TrendDirection,
}

/// Current score and level, from the latest entry.
pub fn current(history: &[RiskScoreEntry]) -> Option<(u8, RiskLevel)> {
    history.last().map(|entry| (entry.score, entry.level))
}

/// Trend across the entries inside the lookback window. Returns `None`
/// when the window holds no entries.
pub fn trend(history: &[RiskScoreEntry], lookback: Duration, now: DateTime<Utc>) -> Option<RiskTrend> {
    let cutoff = now - lookback;
    let in_window: Vec<&RiskScoreEntry> =
        history.iter().filter(|e| e.timestamp >= cutoff).collect();

    let first = in_window.first()?;
    let last = in_window.last()?;

    let delta = last.score as i32 - first.score as i32;
    let direction = if delta > TREND_THRESHOLD {
        TrendDirection::Increasing
    } else if delta < -TREND_THRESHOLD {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    Some(RiskTrend {
        first_score: first.score,
        last_score: last.score,
        direction,
    })
}

/// Highest score ever recorded and when it was reached. Ties resolve to
/// the earliest occurrence.
pub fn peak(history: &[RiskScoreEntry]) -> Option<(u8, DateTime<Utc>)> {
    history
        .iter()
        .max_by(|a, b| a.score.cmp(&b.score).then(b.timestamp.cmp(&a.timestamp)))
        .map(|entry| (entry.score, entry.timestamp))
}

/// Mean score across the whole history.
pub fn average(history: &[RiskScoreEntry]) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let sum: u32 = history.iter().map(|e| e.score as u32).sum();
    Some(sum as f64 / history.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use singura_core::RiskTrigger;

    fn entry(score: u8, minutes_ago: i64) -> RiskScoreEntry {
        RiskScoreEntry {
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            score,
            level: RiskLevel::from_score(score),
            factors: Vec::new(),
            trigger: RiskTrigger::DetectorUpdate,
            rapid_change: false,
        }
    }

    #[test]
    fn test_trend_directions() {
        let now = Utc::now();
        let increasing = vec![entry(20, 60), entry(35, 30), entry(45, 5)];
        let t = trend(&increasing, Duration::hours(2), now).unwrap();
        assert_eq!(t.direction, TrendDirection::Increasing);
        assert_eq!(t.first_score, 20);
        assert_eq!(t.last_score, 45);

        let stable = vec![entry(40, 60), entry(45, 5)];
        assert_eq!(
            trend(&stable, Duration::hours(2), now).unwrap().direction,
            TrendDirection::Stable
        );

        let decreasing = vec![entry(80, 60), entry(30, 5)];
        assert_eq!(
            trend(&decreasing, Duration::hours(2), now).unwrap().direction,
            TrendDirection::Decreasing
        );
    }

    #[test]
    fn test_trend_respects_window() {
        let now = Utc::now();
        let history = vec![entry(5, 600), entry(50, 30), entry(55, 5)];
        // Only the last two entries are inside the one-hour window.
        let t = trend(&history, Duration::hours(1), now).unwrap();
        assert_eq!(t.first_score, 50);
        assert_eq!(t.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_peak_and_average() {
        let history = vec![entry(10, 90), entry(70, 60), entry(70, 30), entry(40, 5)];

        let (score, timestamp) = peak(&history).unwrap();
        assert_eq!(score, 70);
        // Earliest of the tied peaks.
        assert_eq!(timestamp, history[1].timestamp);

        assert_eq!(average(&history).unwrap(), 47.5);
    }

    #[test]
    fn test_empty_history() {
        assert!(current(&[]).is_none());
        assert!(peak(&[]).is_none());
        assert!(average(&[]).is_none());
        assert!(trend(&[], Duration::hours(1), Utc::now()).is_none());
    }
}
