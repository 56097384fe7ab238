//! Anomaly detection for power-consumption series
//!
//! This module provides:
//! - An isolation-forest outlier scorer over the shared feature vectors
//! - An adaptive threshold that scales with the requested sensitivity
//! - Spike / dip / pattern-change classification and a severity summary

mod detector;
mod forest;
mod threshold;

pub use detector::{AnomalyDetector, DetectorConfig, ANOMALY_MODEL};
pub use forest::{ForestError, IsolationForest};
pub use threshold::{
    adaptive_threshold, classify, normalize_decisions, target_fraction, SeverityThresholds,
    MAX_SENSITIVITY, MIN_SENSITIVITY, THRESHOLD_FLOOR,
};
