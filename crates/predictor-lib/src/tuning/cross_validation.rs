//! Expanding-window cross-validation for time series
//!
//! Fold `k` trains on everything before `start + min_train + k * validation`
//! and validates on the following `validation` span. Training data therefore
//! always precedes validation data.

use crate::models::Sample;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const DEFAULT_N_SPLITS: usize = 4;
pub const DEFAULT_MIN_TRAIN_DAYS: i64 = 3;
pub const DEFAULT_VALIDATION_DAYS: i64 = 1;

/// One train/validation pair borrowed from the input sequence
#[derive(Debug, Clone, Copy)]
pub struct CrossValidationFold<'a> {
    pub train: &'a [Sample],
    pub validation: &'a [Sample],
}

/// Diagnostics for one fold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldInfo {
    pub fold: usize,
    pub train_size: usize,
    pub validation_size: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub validation_start: DateTime<Utc>,
    pub validation_end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesCrossValidator {
    n_splits: usize,
    min_train: Duration,
    validation: Duration,
}

impl TimeSeriesCrossValidator {
    pub fn new(n_splits: usize, min_train_days: i64, validation_days: i64) -> Self {
        Self::with_windows(
            n_splits,
            Duration::days(min_train_days),
            Duration::days(validation_days),
        )
    }

    pub fn with_windows(n_splits: usize, min_train: Duration, validation: Duration) -> Self {
        Self {
            n_splits: n_splits.max(1),
            min_train,
            validation,
        }
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Number of folds that fit into the span of `samples`
    ///
    /// Shrinks below the configured count when the history is short, but
    /// stays at one as long as the samples span any time at all.
    pub fn effective_splits(&self, samples: &[Sample]) -> usize {
        let (first, last) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return 0,
        };
        let span = last - first;
        if span <= Duration::zero() {
            return 0;
        }

        let required = self.min_train + self.validation * self.n_splits as i32;
        if span >= required {
            return self.n_splits;
        }

        let spare = (span - self.min_train).num_milliseconds();
        let step = self.validation.num_milliseconds().max(1);
        (spare.div_euclid(step)).max(1) as usize
    }

    /// Lazily yield the folds; folds with an empty side are skipped
    pub fn split<'a>(&self, samples: &'a [Sample]) -> Folds<'a> {
        Folds {
            samples,
            origin: samples.first().map(|s| s.timestamp),
            min_train: self.min_train,
            validation: self.validation,
            next_fold: 0,
            n_folds: self.effective_splits(samples),
        }
    }

    /// Sizes and time ranges of every fold `split` would yield
    pub fn fold_info(&self, samples: &[Sample]) -> Vec<FoldInfo> {
        self.split(samples)
            .enumerate()
            .map(|(i, fold)| FoldInfo {
                fold: i + 1,
                train_size: fold.train.len(),
                validation_size: fold.validation.len(),
                train_start: fold.train[0].timestamp,
                train_end: fold.train[fold.train.len() - 1].timestamp,
                validation_start: fold.validation[0].timestamp,
                validation_end: fold.validation[fold.validation.len() - 1].timestamp,
            })
            .collect()
    }
}

impl Default for TimeSeriesCrossValidator {
    fn default() -> Self {
        Self::new(
            DEFAULT_N_SPLITS,
            DEFAULT_MIN_TRAIN_DAYS,
            DEFAULT_VALIDATION_DAYS,
        )
    }
}

/// Iterator returned by [`TimeSeriesCrossValidator::split`]
#[derive(Debug, Clone)]
pub struct Folds<'a> {
    samples: &'a [Sample],
    origin: Option<DateTime<Utc>>,
    min_train: Duration,
    validation: Duration,
    next_fold: usize,
    n_folds: usize,
}

impl<'a> Iterator for Folds<'a> {
    type Item = CrossValidationFold<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let origin = self.origin?;
        while self.next_fold < self.n_folds {
            let boundary = origin + self.min_train + self.validation * self.next_fold as i32;
            let end = boundary + self.validation;
            self.next_fold += 1;

            let train_end = self.samples.partition_point(|s| s.timestamp < boundary);
            let validation_end = self.samples.partition_point(|s| s.timestamp < end);
            if train_end == 0 || validation_end == train_end {
                continue;
            }

            return Some(CrossValidationFold {
                train: &self.samples[..train_end],
                validation: &self.samples[train_end..validation_end],
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(hours: i64) -> Vec<Sample> {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        (0..hours)
            .map(|i| Sample::new(start + Duration::hours(i), i as f64))
            .collect()
    }

    #[test]
    fn test_full_history_yields_configured_folds() {
        let samples = hourly(24 * 10);
        let cv = TimeSeriesCrossValidator::default();
        let folds: Vec<_> = cv.split(&samples).collect();

        assert_eq!(folds.len(), 4);
        assert_eq!(folds[0].train.len(), 72);
        assert_eq!(folds[0].validation.len(), 24);
        assert_eq!(folds[3].train.len(), 72 + 3 * 24);
    }

    #[test]
    fn test_train_precedes_validation() {
        let samples = hourly(24 * 8 + 5);
        let cv = TimeSeriesCrossValidator::default();
        for fold in cv.split(&samples) {
            let last_train = fold.train.last().unwrap().timestamp;
            let first_validation = fold.validation.first().unwrap().timestamp;
            assert!(last_train < first_validation);
        }
    }

    #[test]
    fn test_expanding_window() {
        let samples = hourly(24 * 10);
        let cv = TimeSeriesCrossValidator::default();
        let sizes: Vec<usize> = cv.split(&samples).map(|f| f.train.len()).collect();
        assert!(sizes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_short_history_shrinks_fold_count() {
        // 5 days: floor((5 - 3) / 1) = 2 folds, configured count untouched
        let samples = hourly(24 * 5 + 1);
        let cv = TimeSeriesCrossValidator::default();
        assert_eq!(cv.effective_splits(&samples), 2);
        assert_eq!(cv.split(&samples).count(), 2);
        assert_eq!(cv.n_splits(), 4);
    }

    #[test]
    fn test_history_shorter_than_min_train() {
        // One day of data: a single fold is attempted, but it has no validation side
        let samples = hourly(24);
        let cv = TimeSeriesCrossValidator::default();
        assert_eq!(cv.effective_splits(&samples), 1);
        assert_eq!(cv.split(&samples).count(), 0);
    }

    #[test]
    fn test_degenerate_input() {
        let cv = TimeSeriesCrossValidator::default();
        assert_eq!(cv.split(&[]).count(), 0);
        assert_eq!(cv.effective_splits(&hourly(1)), 0);
    }

    #[test]
    fn test_split_is_restartable() {
        let samples = hourly(24 * 9);
        let cv = TimeSeriesCrossValidator::new(3, 2, 1);
        let first: Vec<(usize, usize)> = cv
            .split(&samples)
            .map(|f| (f.train.len(), f.validation.len()))
            .collect();
        let second: Vec<(usize, usize)> = cv
            .split(&samples)
            .map(|f| (f.train.len(), f.validation.len()))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sub_day_windows() {
        let samples = hourly(48);
        let cv = TimeSeriesCrossValidator::with_windows(3, Duration::hours(24), Duration::hours(6));
        let folds: Vec<_> = cv.split(&samples).collect();
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[2].train.len(), 36);
        assert_eq!(folds[2].validation.len(), 6);
    }

    #[test]
    fn test_fold_info_matches_split() {
        let samples = hourly(24 * 10);
        let cv = TimeSeriesCrossValidator::default();
        let info = cv.fold_info(&samples);
        assert_eq!(info.len(), 4);
        assert_eq!(info[0].fold, 1);
        assert_eq!(info[0].train_size, 72);
        assert_eq!(info[0].validation_start, samples[72].timestamp);
        assert_eq!(info[0].validation_end, samples[95].timestamp);
    }
}
