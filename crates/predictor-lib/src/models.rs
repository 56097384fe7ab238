//! Core data models for the energy predictor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PredictorError, Result};

/// A single power-consumption measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Check that a model-facing sequence is strictly ascending with finite,
/// non-negative values.
pub fn validate_samples(samples: &[Sample]) -> Result<()> {
    for (i, sample) in samples.iter().enumerate() {
        if !sample.value.is_finite() || sample.value < 0.0 {
            return Err(PredictorError::InvalidSamples {
                reason: format!("sample {} has invalid value {}", i, sample.value),
            });
        }
        if i > 0 && samples[i - 1].timestamp >= sample.timestamp {
            return Err(PredictorError::InvalidSamples {
                reason: format!(
                    "sample {} at {} is not strictly after {}",
                    i,
                    sample.timestamp.to_rfc3339(),
                    samples[i - 1].timestamp.to_rfc3339()
                ),
            });
        }
    }
    Ok(())
}

/// One hourly forecast value with its uncertainty interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_value: f64,
    pub lower_bound: f64,
    /// Not clamped, may sit below the clamped point estimate.
    pub upper_bound: f64,
}

/// Classification of a detected anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Spike,
    Dip,
    PatternChange,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Spike => "spike",
            AnomalyType::Dip => "dip",
            AnomalyType::PatternChange => "pattern_change",
        }
    }
}

/// A sample flagged as anomalous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPoint {
    pub timestamp: DateTime<Utc>,
    pub actual_value: f64,
    pub expected_value: f64,
    /// Normalized to [0, 1], 1.0 = most anomalous
    pub anomaly_score: f64,
    pub anomaly_type: AnomalyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total_count: usize,
    pub severity: Severity,
}

impl AnomalySummary {
    pub fn empty() -> Self {
        Self {
            total_count: 0,
            severity: Severity::Low,
        }
    }
}

/// Anomalies found in a detection window together with their summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub anomalies: Vec<AnomalyPoint>,
    pub summary: AnomalySummary,
}

impl DetectionReport {
    pub fn empty() -> Self {
        Self {
            anomalies: Vec::new(),
            summary: AnomalySummary::empty(),
        }
    }
}

/// Training status of a model wrapper, without the trained handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub is_trained: bool,
    pub last_trained: Option<DateTime<Utc>>,
    pub data_points_used: usize,
}

impl ModelState {
    pub fn untrained() -> Self {
        Self {
            is_trained: false,
            last_trained: None,
            data_points_used: 0,
        }
    }

    /// Untrained, or trained longer ago than `max_age`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.last_trained {
            Some(last) if self.is_trained => now - last > max_age,
            _ => true,
        }
    }
}

/// Status snapshot for both models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsStatus {
    pub forecaster: ModelState,
    pub anomaly_detector: ModelState,
}
