//! Anomaly model wrapper
//!
//! Owns the trained isolation forest, serialises training behind its own
//! lock and turns forest decisions into classified anomaly points using an
//! adaptive threshold.

use super::forest::IsolationForest;
use super::threshold::{
    adaptive_threshold, classify, normalize_decisions, SeverityThresholds, MAX_SENSITIVITY,
    MIN_SENSITIVITY,
};
use crate::error::{PredictorError, Result};
use crate::features::{centered_rolling_mean, FeatureExtractor, DEFAULT_ROLLING_WINDOW};
use crate::models::{validate_samples, AnomalyPoint, AnomalySummary, ModelState, Sample};
use crate::observability::PredictorMetrics;
use crate::tuning::{AnomalyParams, HyperparameterTuner};
use crate::worker::WorkerPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const ANOMALY_MODEL: &str = "anomaly_detector";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_training_points: usize,
    /// Trailing window of the rolling feature columns
    pub rolling_window: usize,
    /// Centered window of the expected-value baseline
    pub expected_window: usize,
    /// Smallest absolute deviation from the baseline worth reporting
    pub min_power_diff: f64,
    pub severity: SeverityThresholds,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_training_points: 48,
            rolling_window: DEFAULT_ROLLING_WINDOW,
            expected_window: DEFAULT_ROLLING_WINDOW,
            min_power_diff: 50.0,
            severity: SeverityThresholds::default(),
        }
    }
}

/// One trained generation
struct TrainedDetector {
    forest: IsolationForest,
    params: AnomalyParams,
    trained_at: DateTime<Utc>,
    data_points: usize,
}

pub struct AnomalyDetector {
    config: DetectorConfig,
    extractor: FeatureExtractor,
    pool: WorkerPool,
    tuner: Arc<HyperparameterTuner>,
    metrics: PredictorMetrics,
    training_lock: Mutex<()>,
    current: RwLock<Option<Arc<TrainedDetector>>>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig, pool: WorkerPool, tuner: Arc<HyperparameterTuner>) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.rolling_window),
            config,
            pool,
            tuner,
            metrics: PredictorMetrics::new(),
            training_lock: Mutex::new(()),
            current: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn generation(&self) -> Option<Arc<TrainedDetector>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn install(&self, generation: TrainedDetector) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Arc::new(generation));
    }

    pub fn is_trained(&self) -> bool {
        self.generation().is_some()
    }

    /// Parameters of the installed generation
    pub fn params(&self) -> Option<AnomalyParams> {
        self.generation().map(|g| g.params.clone())
    }

    pub fn status(&self) -> ModelState {
        match self.generation() {
            Some(g) => ModelState {
                is_trained: true,
                last_trained: Some(g.trained_at),
                data_points_used: g.data_points,
            },
            None => ModelState::untrained(),
        }
    }

    /// Fit a new forest with the tuner's current parameters
    ///
    /// On any error the previously installed generation stays in place.
    pub async fn train(&self, samples: Vec<Sample>) -> Result<ModelState> {
        if samples.len() < self.config.min_training_points {
            return Err(PredictorError::InsufficientData {
                actual: samples.len(),
                required: self.config.min_training_points,
            });
        }
        validate_samples(&samples)?;

        let _guard = self.training_lock.lock().await;
        let params = self.tuner.anomaly_params();
        let extractor = self.extractor.clone();
        let data_points = samples.len();
        let started = Instant::now();

        info!(
            model = ANOMALY_MODEL,
            data_points,
            n_estimators = params.n_estimators,
            "Training anomaly detector"
        );

        let fit_params = params.clone();
        let fitted = self
            .pool
            .run(move || {
                let rows = extractor.extract(&samples);
                IsolationForest::fit(&rows, &fit_params)
            })
            .await
            .map_err(|e| PredictorError::training(ANOMALY_MODEL, e))
            .and_then(|r| r.map_err(|e| PredictorError::training(ANOMALY_MODEL, e)));

        let forest = match fitted {
            Ok(forest) => forest,
            Err(e) => {
                self.metrics.inc_training_failures(ANOMALY_MODEL);
                return Err(e);
            }
        };

        self.install(TrainedDetector {
            forest,
            params,
            trained_at: Utc::now(),
            data_points,
        });

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_training_duration(ANOMALY_MODEL, elapsed);
        self.metrics.set_model_trained(ANOMALY_MODEL, true);
        info!(model = ANOMALY_MODEL, data_points, duration_secs = elapsed, "Anomaly detector trained");

        Ok(self.status())
    }

    /// Flag anomalous samples
    ///
    /// `sensitivity` in [0.1, 1.0]; higher values admit more points.
    pub async fn detect(&self, samples: Vec<Sample>, sensitivity: f64) -> Result<Vec<AnomalyPoint>> {
        let generation = self
            .generation()
            .ok_or_else(|| PredictorError::not_trained(ANOMALY_MODEL))?;

        if !(MIN_SENSITIVITY..=MAX_SENSITIVITY).contains(&sensitivity) {
            return Err(PredictorError::InvalidArgument {
                name: "sensitivity".to_string(),
                reason: format!(
                    "{} outside [{}, {}]",
                    sensitivity, MIN_SENSITIVITY, MAX_SENSITIVITY
                ),
            });
        }
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        validate_samples(&samples)?;

        let started = Instant::now();
        let extractor = self.extractor.clone();
        let expected_window = self.config.expected_window;
        let min_power_diff = self.config.min_power_diff;

        let anomalies = self
            .pool
            .run(move || {
                let rows = extractor.extract(&samples);
                let decisions = generation.forest.decision_function(&rows)?;
                let scores = normalize_decisions(&decisions);
                let threshold = adaptive_threshold(&scores, sensitivity);
                let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
                let expected = centered_rolling_mean(&values, expected_window);

                debug!(threshold, points = samples.len(), "Scoring detection window");

                let anomalies: Vec<AnomalyPoint> = samples
                    .iter()
                    .enumerate()
                    .filter(|&(i, sample)| {
                        decisions[i] < 0.0
                            && scores[i] > threshold
                            && (sample.value - expected[i]).abs() > min_power_diff
                    })
                    .map(|(i, sample)| AnomalyPoint {
                        timestamp: sample.timestamp,
                        actual_value: sample.value,
                        expected_value: expected[i],
                        anomaly_score: scores[i],
                        anomaly_type: classify(sample.value, expected[i]),
                    })
                    .collect();
                Ok::<_, super::forest::ForestError>(anomalies)
            })
            .await
            .map_err(|e| PredictorError::prediction(ANOMALY_MODEL, "detect", e))?
            .map_err(|e| PredictorError::prediction(ANOMALY_MODEL, "detect", e))?;

        self.metrics
            .observe_prediction_latency("detect", started.elapsed().as_secs_f64());
        self.metrics.add_anomalies_detected(anomalies.len() as u64);
        if !anomalies.is_empty() {
            warn!(count = anomalies.len(), sensitivity, "Anomalies detected");
        }

        Ok(anomalies)
    }

    pub fn summarize(&self, anomalies: &[AnomalyPoint]) -> AnomalySummary {
        self.config.severity.summarize(anomalies)
    }
}
