//! Model lifecycle orchestration
//!
//! Owns both model wrappers and the tuner, drives periodic retraining and
//! tuning, and answers the forecast, detection and status calls of the
//! serving layer.

use super::jobs::{JobScheduler, JobSpec, SchedulerStatus};
use crate::anomaly::{AnomalyDetector, ANOMALY_MODEL, MAX_SENSITIVITY, MIN_SENSITIVITY};
use crate::data::DataSource;
use crate::error::{PredictorError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{DetectionReport, ForecastPoint, ModelState, ModelsStatus, Sample};
use crate::observability::{PredictorMetrics, StructuredLogger};
use crate::predictor::{Forecaster, FORECAST_MODEL};
use crate::tuning::{HyperparameterRecord, HyperparameterTuner};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const TRAINING_JOB: &str = "train_models";
pub const TUNING_JOB: &str = "tune_models";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub retrain_interval_hours: u64,
    pub tuning_interval_days: u64,
    pub enable_auto_tuning: bool,
    /// How late a firing may start before it is skipped
    pub misfire_grace_secs: u64,
    /// History used for training
    pub training_days: u32,
    /// History used for tuning
    pub tuning_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retrain_interval_hours: 24,
            tuning_interval_days: 7,
            enable_auto_tuning: true,
            misfire_grace_secs: 3600,
            training_days: 7,
            tuning_days: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_hours * 3600)
    }

    pub fn tuning_interval(&self) -> Duration {
        Duration::from_secs(self.tuning_interval_days * 86_400)
    }

    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }
}

/// Result of one model's training pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained { data_points: usize },
    Failed { error_code: String, reason: String },
}

impl TrainingOutcome {
    fn from_result(result: &Result<ModelState>) -> Self {
        match result {
            Ok(state) => TrainingOutcome::Trained {
                data_points: state.data_points_used,
            },
            Err(e) => TrainingOutcome::Failed {
                error_code: e.error_code().to_string(),
                reason: e.to_string(),
            },
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, TrainingOutcome::Trained { .. })
    }
}

/// Independent outcomes of one training cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub forecaster: TrainingOutcome,
    pub anomaly_detector: TrainingOutcome,
    pub completed_at: chrono::DateTime<Utc>,
}

pub struct ModelOrchestrator {
    config: SchedulerConfig,
    source: Arc<dyn DataSource>,
    forecaster: Arc<Forecaster>,
    detector: Arc<AnomalyDetector>,
    tuner: Arc<HyperparameterTuner>,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: PredictorMetrics,
    scheduler: Mutex<Option<Arc<JobScheduler>>>,
    last_training: Mutex<Option<TrainingReport>>,
}

impl ModelOrchestrator {
    pub fn new(
        config: SchedulerConfig,
        source: Arc<dyn DataSource>,
        forecaster: Arc<Forecaster>,
        detector: Arc<AnomalyDetector>,
        tuner: Arc<HyperparameterTuner>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            config,
            source,
            forecaster,
            detector,
            tuner,
            health,
            logger: StructuredLogger::new("energy-predictor"),
            metrics: PredictorMetrics::new(),
            scheduler: Mutex::new(None),
            last_training: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn forecaster(&self) -> &Arc<Forecaster> {
        &self.forecaster
    }

    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    pub fn tuner(&self) -> &Arc<HyperparameterTuner> {
        &self.tuner
    }

    fn current_scheduler(&self) -> Option<Arc<JobScheduler>> {
        match self.scheduler.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Load tuned parameters, schedule the jobs and train right away if the
    /// models are stale
    ///
    /// Returns whether an immediate training run was started.
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        if self.current_scheduler().is_some() {
            warn!("Orchestrator already started");
            return Ok(false);
        }

        for name in [
            components::FORECASTER,
            components::ANOMALY_DETECTOR,
            components::SCHEDULER,
            components::DATA_SOURCE,
        ] {
            self.health.register(name).await;
        }

        let loaded = self.tuner.load_params().await.is_some();
        info!(tuned_params_loaded = loaded, "Starting model lifecycle");

        let scheduler = Arc::new(JobScheduler::new());
        let grace = self.config.misfire_grace();

        let weak = Arc::downgrade(self);
        scheduler.add_interval_job(
            JobSpec {
                id: TRAINING_JOB.to_string(),
                name: "Retrain forecaster and anomaly detector".to_string(),
                interval: self.config.retrain_interval(),
                misfire_grace: grace,
            },
            move || run_training_job(weak.clone()),
        );

        if self.config.enable_auto_tuning {
            let weak = Arc::downgrade(self);
            scheduler.add_interval_job(
                JobSpec {
                    id: TUNING_JOB.to_string(),
                    name: "Tune hyperparameters".to_string(),
                    interval: self.config.tuning_interval(),
                    misfire_grace: grace,
                },
                move || run_tuning_job(weak.clone()),
            );
        }

        {
            let mut guard = match self.scheduler.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(scheduler);
        }
        self.health.set_healthy(components::SCHEDULER).await;

        let stale = self.is_stale();
        self.logger.log_startup(env!("CARGO_PKG_VERSION"), stale);
        if stale {
            info!("Models are stale, starting immediate training");
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.train_models().await {
                    error!(error = %e, "Initial training failed");
                }
            });
        } else {
            info!("Models are fresh, skipping immediate training");
        }

        Ok(stale)
    }

    /// Untrained, or trained longer ago than the retrain interval
    pub fn is_stale(&self) -> bool {
        let now = Utc::now();
        let max_age = chrono::Duration::hours(self.config.retrain_interval_hours as i64);
        self.forecaster.status().is_stale(now, max_age)
            || self.detector.status().is_stale(now, max_age)
    }

    /// Fetch fresh data and retrain both models concurrently
    ///
    /// Only a data fetch failure is an error; each model's outcome is
    /// recorded independently in the report.
    pub async fn train_models(&self) -> Result<TrainingReport> {
        let started = Instant::now();
        let days = self.config.training_days;
        info!(days, "Starting model training");

        let (hourly, full) = tokio::join!(
            self.source.get_training_data(days, true),
            self.source.get_training_data(days, false),
        );
        let (hourly, full) = match (hourly, full) {
            (Ok(hourly), Ok(full)) => (hourly, full),
            (Err(e), _) | (_, Err(e)) => {
                self.health
                    .set_unhealthy(components::DATA_SOURCE, e.to_string())
                    .await;
                return Err(e);
            }
        };
        self.health.set_healthy(components::DATA_SOURCE).await;

        let fit_started = Instant::now();
        let (forecast_result, anomaly_result) = tokio::join!(
            self.forecaster.train(hourly),
            self.detector.train(full),
        );
        let fit_secs = fit_started.elapsed().as_secs_f64();

        self.record_outcome(FORECAST_MODEL, components::FORECASTER, &forecast_result, fit_secs)
            .await;
        self.record_outcome(ANOMALY_MODEL, components::ANOMALY_DETECTOR, &anomaly_result, fit_secs)
            .await;

        if forecast_result.is_ok() {
            if let Err(e) = self.forecaster.warm_cache().await {
                warn!(error = %e, "Forecast cache warm-up failed");
            }
        }

        let report = TrainingReport {
            forecaster: TrainingOutcome::from_result(&forecast_result),
            anomaly_detector: TrainingOutcome::from_result(&anomaly_result),
            completed_at: Utc::now(),
        };
        info!(
            forecaster_trained = report.forecaster.is_trained(),
            anomaly_detector_trained = report.anomaly_detector.is_trained(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Model training cycle finished"
        );

        let mut guard = match self.last_training.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(report.clone());
        Ok(report)
    }

    async fn record_outcome(
        &self,
        model: &str,
        component: &str,
        result: &Result<ModelState>,
        duration_secs: f64,
    ) {
        match result {
            Ok(state) => {
                self.logger
                    .log_training_completed(model, state.data_points_used, duration_secs);
                let trained_at = state.last_trained.unwrap_or_else(Utc::now);
                self.health.model_trained(component, trained_at).await;
            }
            Err(e) => {
                self.logger
                    .log_training_failed(model, e.error_code(), &e.to_string());
                let serving_since = self.model_state(model).last_trained;
                self.health
                    .model_training_failed(component, serving_since, e)
                    .await;
            }
        }
    }

    fn model_state(&self, model: &str) -> ModelState {
        if model == FORECAST_MODEL {
            self.forecaster.status()
        } else {
            self.detector.status()
        }
    }

    /// Run a full tuning sweep, then retrain with the new parameters
    pub async fn tune_models(&self) -> Result<HyperparameterRecord> {
        let days = self.config.tuning_days;
        info!(days, "Starting hyperparameter tuning");

        let samples = match self.source.get_training_data(days, true).await {
            Ok(samples) => samples,
            Err(e) => {
                self.health
                    .set_unhealthy(components::DATA_SOURCE, e.to_string())
                    .await;
                return Err(e);
            }
        };

        let required = self.forecaster.config().min_training_points;
        if samples.len() < required {
            return Err(PredictorError::InsufficientData {
                actual: samples.len(),
                required,
            });
        }

        let record = self.tuner.tune_all(samples).await?;
        self.metrics.inc_tuning_runs();
        self.logger.log_tuning_completed(
            record.metrics.get("forecast_mae").copied(),
            record.metrics.get("anomaly_score").copied(),
        );

        if let Err(e) = self.train_models().await {
            error!(error = %e, "Training after tuning failed");
        }
        Ok(record)
    }

    pub async fn forecast(&self, hours: usize, past_context_hours: usize) -> Result<Vec<ForecastPoint>> {
        self.forecaster.predict(hours, past_context_hours).await
    }

    /// Detect anomalies in the last `hours` of data
    ///
    /// A failed data fetch yields an empty report rather than an error.
    pub async fn detect_anomalies(&self, hours: u32, sensitivity: f64) -> Result<DetectionReport> {
        if !self.detector.is_trained() {
            return Err(PredictorError::not_trained(ANOMALY_MODEL));
        }
        if !(MIN_SENSITIVITY..=MAX_SENSITIVITY).contains(&sensitivity) {
            return Err(PredictorError::InvalidArgument {
                name: "sensitivity".to_string(),
                reason: format!(
                    "{} outside [{}, {}]",
                    sensitivity, MIN_SENSITIVITY, MAX_SENSITIVITY
                ),
            });
        }

        let samples: Vec<Sample> = match self.source.get_recent_data(hours).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, hours, "Recent data unavailable, reporting no anomalies");
                self.health
                    .set_unhealthy(components::DATA_SOURCE, e.to_string())
                    .await;
                return Ok(DetectionReport::empty());
            }
        };

        let anomalies = self.detector.detect(samples, sensitivity).await?;
        let summary = self.detector.summarize(&anomalies);
        self.logger.log_anomalies_detected(
            summary.total_count,
            summary.severity.as_str(),
            sensitivity,
        );

        Ok(DetectionReport { anomalies, summary })
    }

    pub fn get_status(&self) -> ModelsStatus {
        ModelsStatus {
            forecaster: self.forecaster.status(),
            anomaly_detector: self.detector.status(),
        }
    }

    pub fn get_scheduler_status(&self) -> SchedulerStatus {
        match self.current_scheduler() {
            Some(scheduler) => scheduler.status(),
            None => SchedulerStatus::NotInitialized,
        }
    }

    pub fn last_training_report(&self) -> Option<TrainingReport> {
        match self.last_training.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stop the scheduled jobs, waiting for in-flight runs
    pub async fn shutdown(&self) {
        if let Some(scheduler) = self.current_scheduler() {
            scheduler.shutdown().await;
            self.health
                .set_degraded(components::SCHEDULER, "scheduler stopped")
                .await;
        }
    }
}

async fn run_training_job(orchestrator: Weak<ModelOrchestrator>) -> Result<()> {
    match orchestrator.upgrade() {
        Some(this) => this.train_models().await.map(|_| ()),
        None => Ok(()),
    }
}

async fn run_tuning_job(orchestrator: Weak<ModelOrchestrator>) -> Result<()> {
    match orchestrator.upgrade() {
        Some(this) => this.tune_models().await.map(|_| ()),
        None => Ok(()),
    }
}
