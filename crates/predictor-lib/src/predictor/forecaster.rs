//! Forecasting model wrapper
//!
//! Owns the trained seasonal model and a single-entry forecast cache. Training
//! is serialised by a per-model lock; forecasts read the installed generation
//! without touching that lock and may see the previous one during a retrain.

use super::cache::{ForecastCache, ForecastCacheEntry};
use super::seasonal::{Estimate, SeasonalModel};
use crate::error::{PredictorError, Result};
use crate::models::{validate_samples, ForecastPoint, ModelState, Sample};
use crate::observability::PredictorMetrics;
use crate::tuning::{ForecastParams, HyperparameterTuner};
use crate::worker::WorkerPool;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const FORECAST_MODEL: &str = "forecaster";

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub min_training_points: usize,
    pub cache_ttl_secs: i64,
    /// Largest horizon served; also the horizon the cache holds
    pub max_forecast_hours: usize,
    /// Largest stretch of fitted history served before the horizon
    pub max_past_context_hours: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_training_points: 48,
            cache_ttl_secs: 3600,
            max_forecast_hours: 168,
            max_past_context_hours: 168,
        }
    }
}

/// Counters for forecast computations and cache use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForecastStats {
    pub computations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct TrainedForecaster {
    model: SeasonalModel,
    params: ForecastParams,
    trained_at: DateTime<Utc>,
    generation: u64,
}

pub struct Forecaster {
    config: ForecastConfig,
    pool: WorkerPool,
    tuner: Arc<HyperparameterTuner>,
    metrics: PredictorMetrics,
    training_lock: Mutex<()>,
    current: RwLock<Option<Arc<TrainedForecaster>>>,
    cache: ForecastCache,
    generations: AtomicU64,
    computations: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Forecaster {
    pub fn new(config: ForecastConfig, pool: WorkerPool, tuner: Arc<HyperparameterTuner>) -> Self {
        Self {
            config,
            pool,
            tuner,
            metrics: PredictorMetrics::new(),
            training_lock: Mutex::new(()),
            current: RwLock::new(None),
            cache: ForecastCache::new(),
            generations: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    fn generation(&self) -> Option<Arc<TrainedForecaster>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn install(&self, trained: TrainedForecaster) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Arc::new(trained));
    }

    pub fn is_trained(&self) -> bool {
        self.generation().is_some()
    }

    /// Parameters of the installed generation
    pub fn params(&self) -> Option<ForecastParams> {
        self.generation().map(|g| g.params.clone())
    }

    pub fn status(&self) -> ModelState {
        match self.generation() {
            Some(g) => ModelState {
                is_trained: true,
                last_trained: Some(g.trained_at),
                data_points_used: g.model.training_points(),
            },
            None => ModelState::untrained(),
        }
    }

    pub fn stats(&self) -> ForecastStats {
        ForecastStats {
            computations: self.computations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Fit a new generation with the tuner's current parameters
    ///
    /// On success the cache is dropped; on any error the previous generation
    /// and cache stay in place.
    pub async fn train(&self, samples: Vec<Sample>) -> Result<ModelState> {
        if samples.len() < self.config.min_training_points {
            return Err(PredictorError::InsufficientData {
                actual: samples.len(),
                required: self.config.min_training_points,
            });
        }
        validate_samples(&samples)?;

        let _guard = self.training_lock.lock().await;
        let params = self.tuner.forecast_params();
        let data_points = samples.len();
        let started = Instant::now();

        info!(
            model = FORECAST_MODEL,
            data_points,
            trend = ?params.trend,
            seasonality_mode = ?params.seasonality_mode,
            "Training forecaster"
        );

        let fit_params = params.clone();
        let fitted = self
            .pool
            .run(move || SeasonalModel::fit(&samples, &fit_params))
            .await
            .map_err(|e| PredictorError::training(FORECAST_MODEL, e))
            .and_then(|r| r.map_err(|e| PredictorError::training(FORECAST_MODEL, e)));

        let model = match fitted {
            Ok(model) => model,
            Err(e) => {
                self.metrics.inc_training_failures(FORECAST_MODEL);
                return Err(e);
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.install(TrainedForecaster {
            model,
            params,
            trained_at: Utc::now(),
            generation,
        });
        self.cache.clear();

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_training_duration(FORECAST_MODEL, elapsed);
        self.metrics.set_model_trained(FORECAST_MODEL, true);
        info!(
            model = FORECAST_MODEL,
            data_points,
            generation,
            duration_secs = elapsed,
            "Forecaster trained"
        );

        Ok(self.status())
    }

    /// Hourly forecast for the next `hours`, optionally preceded by
    /// `past_context_hours` of fitted history
    pub async fn predict(&self, hours: usize, past_context_hours: usize) -> Result<Vec<ForecastPoint>> {
        self.predict_at(hours, past_context_hours, Utc::now()).await
    }

    /// [`predict`](Self::predict) evaluated as of `now`
    pub async fn predict_at(
        &self,
        hours: usize,
        past_context_hours: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ForecastPoint>> {
        let trained = self
            .generation()
            .ok_or_else(|| PredictorError::not_trained(FORECAST_MODEL))?;

        if hours == 0 {
            return Ok(Vec::new());
        }
        if hours > self.config.max_forecast_hours {
            return Err(PredictorError::ResourceLimitError {
                resource: "forecast_hours".to_string(),
                limit: format!("{} hours", self.config.max_forecast_hours),
            });
        }
        if past_context_hours > self.config.max_past_context_hours {
            return Err(PredictorError::ResourceLimitError {
                resource: "past_context_hours".to_string(),
                limit: format!("{} hours", self.config.max_past_context_hours),
            });
        }

        let started = Instant::now();

        if past_context_hours > 0 {
            let points = self.compute(trained, hours, past_context_hours, now).await?;
            self.metrics
                .observe_prediction_latency("forecast", started.elapsed().as_secs_f64());
            return Ok(points);
        }

        let ttl = Duration::seconds(self.config.cache_ttl_secs);
        if let Some(entry) = self.cache.get() {
            if entry.serves(hours, trained.generation, now, ttl) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_cache_hits();
                debug!(hours, "Forecast served from cache");
                return Ok(entry.predictions[..hours].to_vec());
            }
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_cache_misses();

        let generation = trained.generation;
        let max_hours = self.config.max_forecast_hours;
        let mut points = self
            .compute(trained, max_hours, 0, now)
            .await
            .map_err(|e| match e {
                PredictorError::PredictionError { model, reason, .. } => PredictorError::PredictionError {
                    model,
                    operation: format!("predict(hours={})", hours),
                    reason,
                },
                other => other,
            })?;

        self.cache.put(ForecastCacheEntry {
            created_at: now,
            horizon_hours: max_hours,
            predictions: points.clone(),
            generation,
        });

        points.truncate(hours);
        self.metrics
            .observe_prediction_latency("forecast", started.elapsed().as_secs_f64());
        Ok(points)
    }

    /// Fill the cache with a max-horizon forecast; no-op while untrained
    pub async fn warm_cache(&self) -> Result<()> {
        let Some(trained) = self.generation() else {
            debug!("Skipping cache warm-up, forecaster not trained");
            return Ok(());
        };

        let now = Utc::now();
        let generation = trained.generation;
        let max_hours = self.config.max_forecast_hours;
        let points = self.compute(trained, max_hours, 0, now).await?;
        info!(horizon_hours = max_hours, "Forecast cache warmed");

        self.cache.put(ForecastCacheEntry {
            created_at: now,
            horizon_hours: max_hours,
            predictions: points,
            generation,
        });
        Ok(())
    }

    async fn compute(
        &self,
        trained: Arc<TrainedForecaster>,
        hours: usize,
        past_context_hours: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ForecastPoint>> {
        self.computations.fetch_add(1, Ordering::Relaxed);
        let operation = format!("predict(hours={})", hours);

        let points = self
            .pool
            .run(move || forecast_points(&trained.model, hours, past_context_hours, now))
            .await
            .map_err(|e| PredictorError::prediction(FORECAST_MODEL, &operation, e))?
            .map_err(|reason| PredictorError::prediction(FORECAST_MODEL, &operation, reason))?;

        Ok(points)
    }
}

/// Candidate grid, estimation, dedup, ordering and clamping of one forecast
fn forecast_points(
    model: &SeasonalModel,
    hours: usize,
    past_context_hours: usize,
    now: DateTime<Utc>,
) -> std::result::Result<Vec<ForecastPoint>, String> {
    let cutoff = model.cutoff();

    let since_cutoff = (now - cutoff).num_seconds().max(0);
    let catch_up = (since_cutoff + SECONDS_PER_HOUR - 1) / SECONDS_PER_HOUR;
    let periods = hours as i64 + catch_up;

    let window_start = now - Duration::hours(past_context_hours as i64);
    let first = (window_start - cutoff).num_seconds().div_euclid(SECONDS_PER_HOUR);
    let earliest = now - Duration::hours(past_context_hours as i64 + 1);

    let timestamps: Vec<DateTime<Utc>> = (first..=periods)
        .map(|k| cutoff + Duration::hours(k))
        .filter(|ts| *ts > earliest)
        .collect();

    let mut seen = HashSet::new();
    let mut estimates: Vec<Estimate> = model
        .predict(&timestamps)
        .map_err(|e| e.to_string())?
        .into_iter()
        .filter(|e| seen.insert(e.timestamp.timestamp().div_euclid(SECONDS_PER_HOUR)))
        .collect();
    estimates.sort_by_key(|e| e.timestamp);
    estimates.truncate(hours + past_context_hours);

    if estimates.is_empty() {
        return Err("no forecast points in the requested window".to_string());
    }
    if estimates
        .iter()
        .any(|e| !(e.yhat.is_finite() && e.lower.is_finite() && e.upper.is_finite()))
    {
        return Err("model produced non-finite estimates".to_string());
    }

    Ok(estimates
        .into_iter()
        .map(|e| ForecastPoint {
            timestamp: e.timestamp,
            predicted_value: e.yhat.max(0.0),
            lower_bound: e.lower.max(0.0),
            upper_bound: e.upper,
        })
        .collect())
}
