//! Grid-search hyperparameter tuner
//!
//! Every sweep evaluates the default parameters first and only replaces them
//! with a strictly better candidate, so a tuning run never produces a
//! configuration that scores worse than the defaults on the same data.

use super::cross_validation::TimeSeriesCrossValidator;
use super::params::{
    AnomalyGrid, AnomalyParams, ForecastGrid, ForecastParams, HyperparameterRecord, ModelKind,
    TuningHistoryEntry,
};
use crate::anomaly::IsolationForest;
use crate::error::{PredictorError, Result};
use crate::features::{mean, FeatureExtractor};
use crate::models::{validate_samples, Sample};
use crate::predictor::SeasonalModel;
use crate::worker::WorkerPool;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::Instant;
use tokio::fs;
use tracing::{debug, info, warn};

pub const TUNER_MODEL: &str = "hyperparameter_tuner";

/// Log search progress after this many evaluated combinations
const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Where the winning record is persisted
    pub params_path: PathBuf,
    pub cv_folds: usize,
    pub min_train_days: i64,
    pub validation_days: i64,
    pub forecast_grid: ForecastGrid,
    pub anomaly_grid: AnomalyGrid,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            params_path: PathBuf::from("best_params.json"),
            cv_folds: 4,
            min_train_days: 3,
            validation_days: 1,
            forecast_grid: ForecastGrid::default(),
            anomaly_grid: AnomalyGrid::default(),
        }
    }
}

/// Searches both parameter spaces and owns the current best record
pub struct HyperparameterTuner {
    config: TunerConfig,
    pool: WorkerPool,
    current: RwLock<Option<HyperparameterRecord>>,
    history: Mutex<Vec<TuningHistoryEntry>>,
}

impl HyperparameterTuner {
    pub fn new(config: TunerConfig, pool: WorkerPool) -> Self {
        Self {
            config,
            pool,
            current: RwLock::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    fn validator(&self) -> TimeSeriesCrossValidator {
        TimeSeriesCrossValidator::new(
            self.config.cv_folds,
            self.config.min_train_days,
            self.config.validation_days,
        )
    }

    /// Best forecast parameters by mean cross-validated MAE
    ///
    /// Returns the defaults with `f64::INFINITY` when no candidate could be
    /// evaluated.
    pub async fn tune_forecast(
        &self,
        samples: Vec<Sample>,
        grid: ForecastGrid,
    ) -> Result<(ForecastParams, f64)> {
        validate_samples(&samples)?;
        let cv = self.validator();
        let started = Instant::now();

        let (best, mae, entries) = self
            .pool
            .run(move || search_forecast(&samples, &grid, &cv))
            .await
            .map_err(|e| PredictorError::training(TUNER_MODEL, e))?;

        info!(
            model_kind = "forecast",
            best_mae = mae,
            evaluated = entries.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Forecast tuning finished"
        );
        self.append_history(entries);
        Ok((best, mae))
    }

    /// Best forest parameters by mean decision value over the fitting data
    ///
    /// Higher is better. Returns the defaults with `f64::NEG_INFINITY` when no
    /// candidate could be evaluated.
    pub async fn tune_anomaly(
        &self,
        samples: Vec<Sample>,
        grid: AnomalyGrid,
    ) -> Result<(AnomalyParams, f64)> {
        validate_samples(&samples)?;
        let started = Instant::now();

        let (best, score, entries) = self
            .pool
            .run(move || {
                let rows = FeatureExtractor::default().extract(&samples);
                search_anomaly(&rows, &grid)
            })
            .await
            .map_err(|e| PredictorError::training(TUNER_MODEL, e))?;

        info!(
            model_kind = "anomaly",
            best_score = score,
            evaluated = entries.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Anomaly tuning finished"
        );
        self.append_history(entries);
        Ok((best, score))
    }

    /// Tune both models, persist the result and make it current
    pub async fn tune_all(&self, samples: Vec<Sample>) -> Result<HyperparameterRecord> {
        let (forecast, mae) = self
            .tune_forecast(samples.clone(), self.config.forecast_grid.clone())
            .await?;
        let (anomaly, score) = self
            .tune_anomaly(samples, self.config.anomaly_grid.clone())
            .await?;

        let mut metrics = BTreeMap::new();
        if mae.is_finite() {
            metrics.insert("forecast_mae".to_string(), mae);
        }
        if score.is_finite() {
            metrics.insert("anomaly_score".to_string(), score);
        }

        let record = HyperparameterRecord {
            forecast: Some(forecast),
            anomaly: Some(anomaly),
            tuned_at: Utc::now(),
            metrics,
        };

        self.save_params(&record).await?;
        self.install(record.clone());
        Ok(record)
    }

    /// Write `record` as pretty JSON, creating parent directories
    pub async fn save_params(&self, record: &HyperparameterRecord) -> Result<()> {
        let path = &self.config.params_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(record)?;
        fs::write(path, json).await?;
        info!(path = %path.display(), "Saved tuned hyperparameters");
        Ok(())
    }

    /// Load the persisted record and make it current
    ///
    /// A missing or unreadable file yields `None`; it is never an error.
    pub async fn load_params(&self) -> Option<HyperparameterRecord> {
        let path = &self.config.params_path;
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No persisted hyperparameters");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read hyperparameters");
                return None;
            }
        };

        match serde_json::from_str::<HyperparameterRecord>(&contents) {
            Ok(record) => {
                info!(
                    path = %path.display(),
                    tuned_at = %record.tuned_at,
                    "Loaded tuned hyperparameters"
                );
                self.install(record.clone());
                Some(record)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt hyperparameter file");
                None
            }
        }
    }

    /// The record currently in effect, if any
    pub fn current(&self) -> Option<HyperparameterRecord> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn forecast_params(&self) -> ForecastParams {
        self.current()
            .and_then(|r| r.forecast)
            .unwrap_or_default()
    }

    pub fn anomaly_params(&self) -> AnomalyParams {
        self.current()
            .and_then(|r| r.anomaly)
            .unwrap_or_default()
    }

    /// Every evaluated combination since startup, oldest first
    pub fn history(&self) -> Vec<TuningHistoryEntry> {
        match self.history.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn install(&self, record: HyperparameterRecord) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(record);
    }

    fn append_history(&self, entries: Vec<TuningHistoryEntry>) {
        let mut guard = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.extend(entries);
    }
}

fn history_entry<P: Serialize>(model_kind: ModelKind, params: &P, metric: f64) -> TuningHistoryEntry {
    TuningHistoryEntry {
        model_kind,
        params: serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
        metric,
        timestamp: Utc::now(),
    }
}

/// Mean absolute error across all folds
fn evaluate_forecast(
    samples: &[Sample],
    params: &ForecastParams,
    cv: &TimeSeriesCrossValidator,
) -> std::result::Result<f64, String> {
    let mut fold_errors = Vec::new();
    for fold in cv.split(samples) {
        let model = SeasonalModel::fit(fold.train, params).map_err(|e| e.to_string())?;
        let timestamps: Vec<_> = fold.validation.iter().map(|s| s.timestamp).collect();
        let errors: Vec<f64> = model
            .predict(&timestamps)
            .map_err(|e| e.to_string())?
            .iter()
            .zip(fold.validation)
            .map(|(estimate, actual)| (estimate.yhat - actual.value).abs())
            .collect();
        fold_errors.push(mean(&errors));
    }

    if fold_errors.is_empty() {
        return Err("no cross-validation folds".to_string());
    }
    let mae = mean(&fold_errors);
    if mae.is_finite() {
        Ok(mae)
    } else {
        Err("non-finite error".to_string())
    }
}

fn search_forecast(
    samples: &[Sample],
    grid: &ForecastGrid,
    cv: &TimeSeriesCrossValidator,
) -> (ForecastParams, f64, Vec<TuningHistoryEntry>) {
    let total = grid.len() + 1;
    let mut best = (ForecastParams::default(), f64::INFINITY);
    let mut entries = Vec::with_capacity(total);

    info!(
        combinations = total,
        samples = samples.len(),
        folds = cv.effective_splits(samples),
        "Starting forecast tuning"
    );

    let candidates = std::iter::once(ForecastParams::default()).chain(grid.combinations());
    for (i, params) in candidates.enumerate() {
        match evaluate_forecast(samples, &params, cv) {
            Ok(mae) => {
                entries.push(history_entry(ModelKind::Forecast, &params, mae));
                if mae < best.1 {
                    best = (params, mae);
                }
            }
            Err(reason) => {
                warn!(params = ?params, reason = %reason, "Skipping forecast candidate");
            }
        }
        if (i + 1) % PROGRESS_EVERY == 0 {
            info!(evaluated = i + 1, total, best_mae = best.1, "Forecast tuning progress");
        }
    }

    (best.0, best.1, entries)
}

fn search_anomaly<R: AsRef<[f64]>>(
    rows: &[R],
    grid: &AnomalyGrid,
) -> (AnomalyParams, f64, Vec<TuningHistoryEntry>) {
    let total = grid.len() + 1;
    let mut best = (AnomalyParams::default(), f64::NEG_INFINITY);
    let mut entries = Vec::with_capacity(total);

    info!(combinations = total, rows = rows.len(), "Starting anomaly tuning");

    let candidates = std::iter::once(AnomalyParams::default()).chain(grid.combinations());
    for (i, params) in candidates.enumerate() {
        let scored = IsolationForest::fit(rows, &params)
            .and_then(|forest| forest.decision_function(rows))
            .map(|decisions| mean(&decisions));
        match scored {
            Ok(score) if score.is_finite() => {
                entries.push(history_entry(ModelKind::Anomaly, &params, score));
                if score > best.1 {
                    best = (params, score);
                }
            }
            Ok(_) => warn!(params = ?params, "Skipping anomaly candidate with non-finite score"),
            Err(e) => warn!(params = ?params, error = %e, "Skipping anomaly candidate"),
        }
        if (i + 1) % PROGRESS_EVERY == 0 {
            info!(evaluated = i + 1, total, best_score = best.1, "Anomaly tuning progress");
        }
    }

    (best.0, best.1, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::{Contamination, SeasonalityMode, TrendKind};
    use chrono::{Duration, TimeZone};
    use std::f64::consts::PI;
    use tempfile::TempDir;

    fn six_days() -> Vec<Sample> {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap();
        (0..24 * 6)
            .map(|i| {
                let daily = 80.0 * (2.0 * PI * i as f64 / 24.0).sin();
                let jitter = ((i * 37) % 11) as f64 - 5.0;
                Sample::new(start + Duration::hours(i), 400.0 + daily + jitter)
            })
            .collect()
    }

    fn tuner_in(dir: &TempDir) -> HyperparameterTuner {
        let config = TunerConfig {
            params_path: dir.path().join("nested").join("best_params.json"),
            forecast_grid: ForecastGrid {
                trend: vec![TrendKind::None, TrendKind::Additive],
                seasonality_mode: vec![SeasonalityMode::Additive],
                weekly_seasonality: vec![true, false],
            },
            anomaly_grid: AnomalyGrid {
                n_estimators: vec![20],
                contamination: vec![Contamination::Fraction(0.01)],
                max_features: vec![0.5, 1.0],
            },
            ..TunerConfig::default()
        };
        HyperparameterTuner::new(config, WorkerPool::new(1))
    }

    #[tokio::test]
    async fn test_forecast_tuning_never_regresses() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner_in(&dir);
        let grid = tuner.config().forecast_grid.clone();

        let (_, best_mae) = tuner.tune_forecast(six_days(), grid).await.unwrap();
        let history = tuner.history();

        // Defaults are evaluated first
        assert_eq!(history[0].params, serde_json::to_value(ForecastParams::default()).unwrap());
        assert!(best_mae <= history[0].metric);
        assert!(history.iter().all(|h| h.metric >= best_mae));
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_forecast_tuning_without_folds_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner_in(&dir);
        let short: Vec<Sample> = six_days().into_iter().take(30).collect();

        let (params, mae) = tuner
            .tune_forecast(short, ForecastGrid::default())
            .await
            .unwrap();
        assert_eq!(params, ForecastParams::default());
        assert!(mae.is_infinite());
        assert!(tuner.history().is_empty());
    }

    #[tokio::test]
    async fn test_anomaly_tuning_never_regresses() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner_in(&dir);
        let grid = tuner.config().anomaly_grid.clone();

        let (_, best) = tuner.tune_anomaly(six_days(), grid).await.unwrap();
        let history = tuner.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].model_kind, ModelKind::Anomaly);
        assert!(best >= history[0].metric);
    }

    #[tokio::test]
    async fn test_tune_all_persists_and_installs() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner_in(&dir);
        assert!(tuner.current().is_none());

        let record = tuner.tune_all(six_days()).await.unwrap();
        assert!(tuner.config().params_path.exists());
        assert!(record.metrics.contains_key("forecast_mae"));
        assert!(record.metrics.contains_key("anomaly_score"));
        assert_eq!(tuner.current(), Some(record.clone()));

        // A fresh tuner picks up the persisted record
        let reloaded = tuner_in(&dir);
        let loaded = reloaded.load_params().await.unwrap();
        assert_eq!(loaded.tuned_at, record.tuned_at);
        assert_eq!(loaded.anomaly, record.anomaly);
        assert_eq!(Some(reloaded.forecast_params()), record.forecast);
    }

    #[tokio::test]
    async fn test_saved_record_loads_into_fresh_tuner() {
        let dir = TempDir::new().unwrap();
        let record = HyperparameterRecord {
            forecast: Some(ForecastParams {
                trend: TrendKind::None,
                ..ForecastParams::default()
            }),
            anomaly: None,
            tuned_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            metrics: BTreeMap::new(),
        };
        tuner_in(&dir).save_params(&record).await.unwrap();

        let written = tokio::fs::read_to_string(&tuner_in(&dir).config().params_path)
            .await
            .unwrap();
        assert!(written.contains("\n  \"forecast\""));

        let reloaded = tuner_in(&dir);
        assert_eq!(reloaded.load_params().await, Some(record));
        assert_eq!(reloaded.forecast_params().trend, TrendKind::None);
        assert_eq!(reloaded.anomaly_params(), AnomalyParams::default());
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner_in(&dir);
        assert!(tuner.load_params().await.is_none());

        tokio::fs::create_dir_all(dir.path().join("nested")).await.unwrap();
        tokio::fs::write(&tuner.config().params_path, "{not json").await.unwrap();
        assert!(tuner.load_params().await.is_none());
        assert_eq!(tuner.forecast_params(), ForecastParams::default());
        assert_eq!(tuner.anomaly_params(), AnomalyParams::default());
    }

    #[tokio::test]
    async fn test_rejects_unsorted_samples() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner_in(&dir);
        let mut samples = six_days();
        samples.swap(0, 1);
        let err = tuner
            .tune_forecast(samples, ForecastGrid::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_SAMPLES");
    }
}
