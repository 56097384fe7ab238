//! Seasonal forecasting model
//!
//! Samples are averaged per hour and gaps are interpolated onto a regular
//! hourly grid. MSTL splits that series into daily and weekly components plus
//! a trend, and the trend is extrapolated by an automatically selected ETS
//! model. Series too short for any seasonal period are fitted by ETS alone.
//! Multiplicative mode fits on `ln(1 + y)` so seasonal swings scale with the
//! level.

use crate::data::downsample_hourly;
use crate::models::Sample;
use crate::tuning::{ForecastParams, SeasonalityMode};
use augurs_core::{Fit, Forecast, Predict};
use augurs_ets::AutoETS;
use augurs_mstl::MSTLModel;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

const SECONDS_PER_HOUR: i64 = 3600;

const DAILY_PERIOD: usize = 24;
const WEEKLY_PERIOD: usize = 24 * 7;
const YEARLY_PERIOD: usize = 8766;

/// Nominal coverage of the prediction interval
const INTERVAL_LEVEL: f64 = 0.8;

/// z-score of an 80% interval, for models that report no interval
const INTERVAL_Z: f64 = 1.2816;

const MIN_FIT_SAMPLES: usize = 10;

/// Interpolated hours may at most match the observed ones
const MAX_FILL_RATIO: usize = 2;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("need at least {required} hourly buckets to fit, got {actual}")]
    TooFewSamples { actual: usize, required: usize },
    #[error("{observed} observed hours spread over {span} hours")]
    TooSparse { observed: usize, span: usize },
    #[error("multiplicative seasonality requires non-negative values")]
    NegativeValues,
    #[error("{stage} failed: {reason}")]
    Model { stage: &'static str, reason: String },
    #[error("model produced non-finite values")]
    NonFinite,
}

fn model_error(stage: &'static str, err: impl fmt::Display) -> FitError {
    FitError::Model {
        stage,
        reason: err.to_string(),
    }
}

/// Model output for one timestamp, unclamped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub timestamp: DateTime<Utc>,
    pub yhat: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy)]
struct Band {
    yhat: f64,
    lower: f64,
    upper: f64,
}

/// Object-safe view over the fitted MSTL and ETS models
trait FittedSeries: Send + Sync {
    fn in_sample(&self) -> Result<Forecast, FitError>;
    fn ahead(&self, horizon: usize) -> Result<Forecast, FitError>;
}

impl<P> FittedSeries for P
where
    P: Predict + Send + Sync,
    P::Error: fmt::Display,
{
    fn in_sample(&self) -> Result<Forecast, FitError> {
        self.predict_in_sample(Some(INTERVAL_LEVEL))
            .map_err(|e| model_error("in-sample prediction", e))
    }

    fn ahead(&self, horizon: usize) -> Result<Forecast, FitError> {
        self.predict(horizon, Some(INTERVAL_LEVEL))
            .map_err(|e| model_error("prediction", e))
    }
}

/// A fitted trend + seasonality model on an hourly grid
pub struct SeasonalModel {
    fitted: Box<dyn FittedSeries>,
    mode: SeasonalityMode,
    periods: Vec<usize>,
    start: DateTime<Utc>,
    cutoff: DateTime<Utc>,
    history: Vec<Band>,
    /// In-sample residual spread on the model scale
    residual_std: f64,
    n_train: usize,
}

impl fmt::Debug for SeasonalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeasonalModel")
            .field("mode", &self.mode)
            .field("periods", &self.periods)
            .field("start", &self.start)
            .field("cutoff", &self.cutoff)
            .field("n_train", &self.n_train)
            .finish_non_exhaustive()
    }
}

impl SeasonalModel {
    /// Fit on strictly ascending samples
    pub fn fit(samples: &[Sample], params: &ForecastParams) -> Result<Self, FitError> {
        let hourly = downsample_hourly(samples);
        if hourly.len() < MIN_FIT_SAMPLES {
            return Err(FitError::TooFewSamples {
                actual: hourly.len(),
                required: MIN_FIT_SAMPLES,
            });
        }

        let start = hourly[0].timestamp;
        let cutoff = hourly[hourly.len() - 1].timestamp;
        let span = hour_offset(start, cutoff) as usize + 1;
        if span > MAX_FILL_RATIO * hourly.len() {
            return Err(FitError::TooSparse {
                observed: hourly.len(),
                span,
            });
        }

        let mode = params.seasonality_mode;
        let series = fill_gaps(&hourly);
        if mode == SeasonalityMode::Multiplicative && series.iter().any(|v| *v < 0.0) {
            return Err(FitError::NegativeValues);
        }
        let y: Vec<f64> = series.iter().map(|&v| to_model_scale(mode, v)).collect();

        let periods = seasonal_periods(params, y.len());
        let trend = AutoETS::new(1, params.trend.ets_spec())
            .map_err(|e| model_error("ETS specification", e))?;
        let fitted: Box<dyn FittedSeries> = if periods.is_empty() {
            Box::new(trend.fit(&y).map_err(|e| model_error("ETS fit", e))?)
        } else {
            let mstl = MSTLModel::new(periods.clone(), trend.into_trend_model());
            Box::new(mstl.fit(&y).map_err(|e| model_error("MSTL fit", e))?)
        };

        let in_sample = fitted.in_sample()?;
        let residual_std = residual_std(&y, &in_sample.point);
        if !residual_std.is_finite() {
            return Err(FitError::NonFinite);
        }

        let mut model = Self {
            fitted,
            mode,
            periods,
            start,
            cutoff,
            history: Vec::new(),
            residual_std,
            n_train: samples.len(),
        };
        model.history = model.bands(&in_sample, false)?;
        Ok(model)
    }

    /// Start of the last training hour
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    pub fn training_points(&self) -> usize {
        self.n_train
    }

    /// Seasonal periods in hours the decomposition used
    pub fn periods(&self) -> &[usize] {
        &self.periods
    }

    /// Point estimate and 80% interval for each timestamp
    ///
    /// Timestamps snap to the nearest hour of the training grid. Hours inside
    /// the training window use the fitted values; later ones are forecast.
    /// Timestamps before the first training hour are skipped.
    pub fn predict(&self, timestamps: &[DateTime<Utc>]) -> Result<Vec<Estimate>, FitError> {
        let n = self.history.len() as i64;
        let offsets: Vec<(DateTime<Utc>, i64)> = timestamps
            .iter()
            .map(|&ts| (ts, hour_offset(self.start, ts)))
            .filter(|(_, k)| *k >= 0)
            .collect();

        let horizon = offsets.iter().map(|(_, k)| k + 1 - n).max().unwrap_or(0);
        let ahead = if horizon > 0 {
            self.bands(&self.fitted.ahead(horizon as usize)?, true)?
        } else {
            Vec::new()
        };

        offsets
            .into_iter()
            .map(|(timestamp, k)| {
                let band = if k < n {
                    self.history.get(k as usize)
                } else {
                    ahead.get((k - n) as usize)
                };
                let band = band.ok_or_else(|| {
                    model_error("prediction", "forecast shorter than requested horizon")
                })?;
                Ok(Estimate {
                    timestamp,
                    yhat: band.yhat,
                    lower: band.lower,
                    upper: band.upper,
                })
            })
            .collect()
    }

    /// Back-transformed bands, widening the fallback interval with the step
    fn bands(&self, forecast: &Forecast, out_of_sample: bool) -> Result<Vec<Band>, FitError> {
        let bands: Vec<Band> = forecast
            .point
            .iter()
            .enumerate()
            .map(|(i, &yhat)| {
                let reported = forecast
                    .intervals
                    .as_ref()
                    .and_then(|iv| Some((*iv.lower.get(i)?, *iv.upper.get(i)?)))
                    .filter(|(lower, upper)| lower.is_finite() && upper.is_finite());
                let (lower, upper) = match reported {
                    Some(bounds) => bounds,
                    None => {
                        let steps = if out_of_sample { i as f64 + 1.0 } else { 1.0 };
                        let half_width = INTERVAL_Z * self.residual_std * steps.sqrt();
                        (yhat - half_width, yhat + half_width)
                    }
                };
                Band {
                    yhat: from_model_scale(self.mode, yhat),
                    lower: from_model_scale(self.mode, lower),
                    upper: from_model_scale(self.mode, upper),
                }
            })
            .collect();

        if bands
            .iter()
            .any(|b| !(b.yhat.is_finite() && b.lower.is_finite() && b.upper.is_finite()))
        {
            return Err(FitError::NonFinite);
        }
        Ok(bands)
    }
}

/// Whole hours from `start` to `ts`, rounded to the nearest hour
fn hour_offset(start: DateTime<Utc>, ts: DateTime<Utc>) -> i64 {
    ((ts - start).num_seconds() + SECONDS_PER_HOUR / 2).div_euclid(SECONDS_PER_HOUR)
}

fn seasonal_periods(params: &ForecastParams, n: usize) -> Vec<usize> {
    [
        (params.daily_seasonality, DAILY_PERIOD),
        (params.weekly_seasonality, WEEKLY_PERIOD),
        (params.yearly_seasonality, YEARLY_PERIOD),
    ]
    .into_iter()
    .filter(|&(enabled, period)| enabled && n >= 2 * period)
    .map(|(_, period)| period)
    .collect()
}

/// Regular hourly series with missing hours linearly interpolated
fn fill_gaps(hourly: &[Sample]) -> Vec<f64> {
    let Some(first) = hourly.first() else {
        return Vec::new();
    };
    let mut series = vec![first.value];
    for pair in hourly.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let gap = hour_offset(a.timestamp, b.timestamp);
        for step in 1..gap {
            let t = step as f64 / gap as f64;
            series.push(a.value + (b.value - a.value) * t);
        }
        series.push(b.value);
    }
    series
}

fn to_model_scale(mode: SeasonalityMode, value: f64) -> f64 {
    match mode {
        SeasonalityMode::Additive => value,
        SeasonalityMode::Multiplicative => value.ln_1p(),
    }
}

fn from_model_scale(mode: SeasonalityMode, value: f64) -> f64 {
    match mode {
        SeasonalityMode::Additive => value,
        SeasonalityMode::Multiplicative => value.exp_m1(),
    }
}

fn residual_std(actual: &[f64], fitted: &[f64]) -> f64 {
    let residuals: Vec<f64> = actual
        .iter()
        .zip(fitted)
        .map(|(y, f)| y - f)
        .filter(|r| r.is_finite())
        .collect();
    if residuals.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = residuals.iter().map(|r| r * r).sum();
    (sum_sq / residuals.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::TrendKind;
    use chrono::{Duration, TimeZone};
    use std::f64::consts::PI;

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    fn daily_wave(hours: usize, base: f64, amplitude: f64) -> Vec<Sample> {
        (0..hours)
            .map(|i| {
                let phase = 2.0 * PI * i as f64 / 24.0;
                Sample::new(origin() + Duration::hours(i as i64), base + amplitude * phase.sin())
            })
            .collect()
    }

    #[test]
    fn test_recovers_daily_pattern() {
        let samples = daily_wave(24 * 7, 500.0, 100.0);
        let model = SeasonalModel::fit(&samples, &ForecastParams::default()).unwrap();
        assert_eq!(model.periods(), &[24]);

        let next_day: Vec<DateTime<Utc>> = (1..=24)
            .map(|h| model.cutoff() + Duration::hours(h))
            .collect();
        let estimates = model.predict(&next_day).unwrap();
        assert_eq!(estimates.len(), 24);

        for (i, estimate) in estimates.iter().enumerate() {
            let hour = (24 * 7 + i) as f64;
            let truth = 500.0 + 100.0 * (2.0 * PI * hour / 24.0).sin();
            assert!(
                (estimate.yhat - truth).abs() < 25.0,
                "hour {} predicted {} expected {}",
                i,
                estimate.yhat,
                truth
            );
            assert!(estimate.lower <= estimate.yhat && estimate.yhat <= estimate.upper);
        }
    }

    #[test]
    fn test_two_weeks_enable_weekly_period() {
        let samples = daily_wave(24 * 14, 500.0, 100.0);
        let model = SeasonalModel::fit(&samples, &ForecastParams::default()).unwrap();
        assert_eq!(model.periods(), &[24, 168]);

        let params = ForecastParams {
            weekly_seasonality: false,
            ..ForecastParams::default()
        };
        let model = SeasonalModel::fit(&samples, &params).unwrap();
        assert_eq!(model.periods(), &[24]);
    }

    #[test]
    fn test_multiplicative_mode_fits() {
        let samples = daily_wave(24 * 5, 400.0, 80.0);
        let params = ForecastParams {
            seasonality_mode: SeasonalityMode::Multiplicative,
            ..ForecastParams::default()
        };
        let model = SeasonalModel::fit(&samples, &params).unwrap();
        let estimate = model.predict(&[model.cutoff() + Duration::hours(6)]).unwrap()[0];
        assert!(estimate.yhat.is_finite());
        assert!((estimate.yhat - 480.0).abs() < 40.0, "got {}", estimate.yhat);
    }

    #[test]
    fn test_without_seasonality_falls_back_to_ets() {
        let samples = daily_wave(48, 300.0, 20.0);
        let params = ForecastParams {
            trend: TrendKind::None,
            daily_seasonality: false,
            weekly_seasonality: false,
            ..ForecastParams::default()
        };
        let model = SeasonalModel::fit(&samples, &params).unwrap();
        assert!(model.periods().is_empty());

        let estimates = model
            .predict(&[model.cutoff() + Duration::hours(3)])
            .unwrap();
        assert!((estimates[0].yhat - 300.0).abs() < 40.0);
    }

    #[test]
    fn test_interval_widens_with_horizon() {
        let mut samples = daily_wave(24 * 4, 300.0, 50.0);
        for (i, s) in samples.iter_mut().enumerate() {
            s.value += if i % 2 == 0 { 7.0 } else { -7.0 };
        }
        let model = SeasonalModel::fit(&samples, &ForecastParams::default()).unwrap();
        let estimates = model
            .predict(&[
                model.cutoff() + Duration::hours(1),
                model.cutoff() + Duration::hours(96),
            ])
            .unwrap();
        let (near, far) = (estimates[0], estimates[1]);
        assert!(far.upper - far.lower > near.upper - near.lower);
    }

    #[test]
    fn test_training_hours_use_fitted_values() {
        let samples = daily_wave(24 * 3, 500.0, 100.0);
        let model = SeasonalModel::fit(&samples, &ForecastParams::default()).unwrap();

        let inside = [samples[30].timestamp, samples[71].timestamp];
        let estimates = model.predict(&inside).unwrap();
        assert_eq!(estimates.len(), 2);
        assert_eq!(estimates[1].timestamp, model.cutoff());
        assert!((estimates[0].yhat - samples[30].value).abs() < 25.0);

        // Before the first training hour nothing is produced
        let before = model
            .predict(&[origin() - Duration::hours(3)])
            .unwrap();
        assert!(before.is_empty());
    }

    #[test]
    fn test_rejects_degenerate_input() {
        let few: Vec<Sample> = daily_wave(5, 100.0, 10.0);
        assert!(matches!(
            SeasonalModel::fit(&few, &ForecastParams::default()),
            Err(FitError::TooFewSamples { actual: 5, .. })
        ));

        // Many samples in one hour collapse to a single bucket
        let same_hour: Vec<Sample> = (0..30)
            .map(|i| Sample::new(origin() + Duration::seconds(i), 1.0))
            .collect();
        assert!(matches!(
            SeasonalModel::fit(&same_hour, &ForecastParams::default()),
            Err(FitError::TooFewSamples { actual: 1, .. })
        ));

        let sparse: Vec<Sample> = (0..12)
            .map(|i| Sample::new(origin() + Duration::hours(3 * i), 1.0))
            .collect();
        assert_eq!(
            SeasonalModel::fit(&sparse, &ForecastParams::default()).unwrap_err(),
            FitError::TooSparse {
                observed: 12,
                span: 34
            }
        );
    }

    #[test]
    fn test_multiplicative_rejects_negative_values() {
        let negative: Vec<Sample> = (0..48)
            .map(|i| Sample::new(origin() + Duration::hours(i), -5.0))
            .collect();
        let params = ForecastParams {
            seasonality_mode: SeasonalityMode::Multiplicative,
            ..ForecastParams::default()
        };
        assert_eq!(
            SeasonalModel::fit(&negative, &params).unwrap_err(),
            FitError::NegativeValues
        );
    }

    #[test]
    fn test_gaps_are_interpolated() {
        let hourly = vec![
            Sample::new(origin(), 10.0),
            Sample::new(origin() + Duration::hours(2), 30.0),
            Sample::new(origin() + Duration::hours(6), 70.0),
        ];
        assert_eq!(
            fill_gaps(&hourly),
            vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0]
        );
    }

    #[test]
    fn test_hour_offset_rounds_to_nearest() {
        assert_eq!(hour_offset(origin(), origin() + Duration::minutes(29)), 0);
        assert_eq!(hour_offset(origin(), origin() + Duration::minutes(31)), 1);
        assert_eq!(hour_offset(origin(), origin() - Duration::minutes(45)), -1);
    }
}
