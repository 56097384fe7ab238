//! Adaptive anomaly threshold, anomaly classification and severity summary

use crate::features::{mean, percentile};
use crate::models::{AnomalyPoint, AnomalySummary, AnomalyType, Severity};
use serde::{Deserialize, Serialize};

pub const MIN_SENSITIVITY: f64 = 0.1;
pub const MAX_SENSITIVITY: f64 = 1.0;

/// Share of points flagged at the lowest and highest sensitivity
const MIN_TARGET_FRACTION: f64 = 0.01;
const MAX_TARGET_FRACTION: f64 = 0.15;

/// No point with a normalized score at or below this is ever flagged
pub const THRESHOLD_FLOOR: f64 = 0.5;

const SPIKE_RATIO: f64 = 1.5;
const DIP_RATIO: f64 = 0.5;

/// Fraction of points the threshold should admit for `sensitivity`
///
/// Quadratic in sensitivity, so low settings stay conservative.
pub fn target_fraction(sensitivity: f64) -> f64 {
    let s = sensitivity.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY);
    let s2 = s * s;
    let lo = MIN_SENSITIVITY * MIN_SENSITIVITY;
    let hi = MAX_SENSITIVITY * MAX_SENSITIVITY;
    MIN_TARGET_FRACTION + (MAX_TARGET_FRACTION - MIN_TARGET_FRACTION) * (s2 - lo) / (hi - lo)
}

/// Percentile threshold over normalized scores, floored at [`THRESHOLD_FLOOR`]
pub fn adaptive_threshold(normalized_scores: &[f64], sensitivity: f64) -> f64 {
    let fraction = target_fraction(sensitivity);
    percentile(normalized_scores, (1.0 - fraction) * 100.0).max(THRESHOLD_FLOOR)
}

/// Map decision values to [0, 1] with 1.0 for the most anomalous point
pub fn normalize_decisions(decisions: &[f64]) -> Vec<f64> {
    let (lo, hi) = decisions
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
    let range = hi - lo;
    if range <= 0.0 || !range.is_finite() {
        return vec![0.0; decisions.len()];
    }
    decisions.iter().map(|d| 1.0 - (d - lo) / range).collect()
}

pub fn classify(actual: f64, expected: f64) -> AnomalyType {
    if actual > expected * SPIKE_RATIO {
        AnomalyType::Spike
    } else if actual < expected * DIP_RATIO {
        AnomalyType::Dip
    } else {
        AnomalyType::PatternChange
    }
}

/// Count and mean-score cutoffs for the overall severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub high_count: usize,
    pub high_score: f64,
    pub medium_count: usize,
    pub medium_score: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            high_count: 10,
            high_score: 0.8,
            medium_count: 5,
            medium_score: 0.6,
        }
    }
}

impl SeverityThresholds {
    pub fn summarize(&self, anomalies: &[AnomalyPoint]) -> AnomalySummary {
        if anomalies.is_empty() {
            return AnomalySummary::empty();
        }

        let count = anomalies.len();
        let scores: Vec<f64> = anomalies.iter().map(|a| a.anomaly_score).collect();
        let mean_score = mean(&scores);

        let severity = if count > self.high_count || mean_score > self.high_score {
            Severity::High
        } else if count > self.medium_count || mean_score > self.medium_score {
            Severity::Medium
        } else {
            Severity::Low
        };

        AnomalySummary {
            total_count: count,
            severity,
        }
    }
}
