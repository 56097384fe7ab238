//! Feature extraction for the forecasting and anomaly models
//!
//! Turns an ordered sample sequence into one fixed-width vector per sample:
//! the raw value, cyclical hour-of-day and day-of-week encodings, trailing
//! rolling statistics and the deviation from the rolling mean.

use crate::models::Sample;
use chrono::{Datelike, Timelike};
use std::f64::consts::PI;

/// Default trailing window (24 hourly samples captures the daily pattern)
pub const DEFAULT_ROLLING_WINDOW: usize = 24;

/// Number of columns produced per sample
pub const NUM_FEATURES: usize = 8;

/// Extracts per-sample feature vectors
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    window_size: usize,
}

impl FeatureExtractor {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Build the feature matrix, one row per sample, in input order.
    ///
    /// Columns: value, hour_sin, hour_cos, dow_sin, dow_cos, rolling_mean,
    /// rolling_std, diff_from_mean.
    pub fn extract(&self, samples: &[Sample]) -> Vec<[f64; NUM_FEATURES]> {
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let (means, stds) = trailing_stats(&values, self.window_size);

        samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let hour = sample.timestamp.hour() as f64;
                let dow = sample.timestamp.weekday().num_days_from_monday() as f64;
                [
                    sample.value,
                    (2.0 * PI * hour / 24.0).sin(),
                    (2.0 * PI * hour / 24.0).cos(),
                    (2.0 * PI * dow / 7.0).sin(),
                    (2.0 * PI * dow / 7.0).cos(),
                    means[i],
                    stds[i],
                    sample.value - means[i],
                ]
            })
            .collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLING_WINDOW)
    }
}

/// Trailing rolling mean and sample standard deviation with a window that
/// shrinks at the left edge instead of producing NaN.
fn trailing_stats(values: &[f64], window: usize) -> (Vec<f64>, Vec<f64>) {
    let mut means = Vec::with_capacity(values.len());
    let mut stds = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = (i + 1).saturating_sub(window);
        let slice = &values[start..=i];
        means.push(mean(slice));
        stds.push(sample_std(slice));
    }
    (means, stds)
}

/// Centered rolling mean: position `i` averages `[i - w/2, i + (w-1)/2]`,
/// clipped to the sequence.
pub fn centered_rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let before = window / 2;
    let after = (window - 1) / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + after).min(values.len() - 1);
            mean(&values[start..=end])
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1), 0.0 below two values
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Percentile with linear interpolation between closest ranks, `p` in [0, 100]
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn hourly(values: &[f64]) -> Vec<Sample> {
        // 2024-01-01 was a Monday
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(start + Duration::hours(i as i64), *v))
            .collect()
    }

    #[test]
    fn test_one_row_per_sample() {
        let extractor = FeatureExtractor::new(3);
        let rows = extractor.extract(&hourly(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(rows.len(), 4);
        assert!(extractor.extract(&[]).is_empty());
    }

    #[test]
    fn test_shrinking_window_at_left_edge() {
        let extractor = FeatureExtractor::new(3);
        let rows = extractor.extract(&hourly(&[2.0, 4.0, 6.0, 8.0]));

        // First row sees only itself
        assert_eq!(rows[0][5], 2.0);
        assert_eq!(rows[0][6], 0.0);
        assert_eq!(rows[0][7], 0.0);

        assert!((rows[1][5] - 3.0).abs() < 1e-12);
        // Full window from the third row on
        assert!((rows[3][5] - 6.0).abs() < 1e-12);
        assert!((rows[3][6] - 2.0).abs() < 1e-12);
        assert!((rows[3][7] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cyclical_encoding() {
        let extractor = FeatureExtractor::default();
        let rows = extractor.extract(&hourly(&vec![1.0; 25]));

        // Midnight on a Monday
        assert!(rows[0][1].abs() < 1e-12);
        assert!((rows[0][2] - 1.0).abs() < 1e-12);
        assert!(rows[0][3].abs() < 1e-12);
        assert!((rows[0][4] - 1.0).abs() < 1e-12);

        // 06:00 is a quarter of the way around the daily circle
        assert!((rows[6][1] - 1.0).abs() < 1e-12);

        // Hour 23 sits next to hour 0 on the circle
        let gap = ((rows[23][1] - rows[24][1]).powi(2) + (rows[23][2] - rows[24][2]).powi(2)).sqrt();
        assert!(gap < 0.3);
    }

    #[test]
    fn test_deterministic() {
        let extractor = FeatureExtractor::default();
        let samples = hourly(&[5.0, 1.0, 7.0, 3.0, 9.0]);
        assert_eq!(extractor.extract(&samples), extractor.extract(&samples));
    }

    #[test]
    fn test_centered_rolling_mean() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let centered = centered_rolling_mean(&values, 3);
        assert_eq!(centered, vec![1.5, 2.0, 3.0, 4.0, 4.5]);

        // Even window leans left: [i-2, i+1]
        let centered = centered_rolling_mean(&values, 4);
        assert!((centered[2] - 2.5).abs() < 1e-12);
        assert!(centered_rolling_mean(&[], 4).is_empty());
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 50.0) - 3.0).abs() < 1e-12);
        assert!((percentile(&values, 90.0) - 4.6).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_sample_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sample_std(&values) - 4.571f64.sqrt()).abs() < 0.01);
        assert_eq!(sample_std(&[3.0]), 0.0);
    }
}
