//! Observability infrastructure for the energy predictor
//!
//! Provides:
//! - Prometheus metrics (training duration, prediction latency, cache hits, anomalies)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for model fits (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Histogram buckets for forecast and detection calls (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PredictorMetricsInner> = OnceLock::new();

struct PredictorMetricsInner {
    training_duration_seconds: HistogramVec,
    prediction_latency_seconds: HistogramVec,
    training_failures: IntCounterVec,
    job_failures: IntCounterVec,
    tuning_runs: IntCounter,
    anomalies_detected: IntCounter,
    forecast_cache_hits: IntCounter,
    forecast_cache_misses: IntCounter,
    model_trained: IntGaugeVec,
}

impl PredictorMetricsInner {
    fn new() -> Self {
        Self {
            training_duration_seconds: register_histogram_vec!(
                "energy_predictor_training_duration_seconds",
                "Time spent fitting a model",
                &["model"],
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            prediction_latency_seconds: register_histogram_vec!(
                "energy_predictor_prediction_latency_seconds",
                "Time spent serving a forecast or detection call",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            training_failures: register_int_counter_vec!(
                "energy_predictor_training_failures_total",
                "Model fits that failed",
                &["model"]
            )
            .expect("Failed to register training_failures"),

            job_failures: register_int_counter_vec!(
                "energy_predictor_job_failures_total",
                "Scheduled job runs that ended in an error",
                &["job"]
            )
            .expect("Failed to register job_failures"),

            tuning_runs: register_int_counter!(
                "energy_predictor_tuning_runs_total",
                "Completed hyperparameter tuning runs"
            )
            .expect("Failed to register tuning_runs"),

            anomalies_detected: register_int_counter!(
                "energy_predictor_anomalies_detected_total",
                "Total number of anomalies reported"
            )
            .expect("Failed to register anomalies_detected"),

            forecast_cache_hits: register_int_counter!(
                "energy_predictor_forecast_cache_hits_total",
                "Forecast requests answered from the cache"
            )
            .expect("Failed to register forecast_cache_hits"),

            forecast_cache_misses: register_int_counter!(
                "energy_predictor_forecast_cache_misses_total",
                "Forecast requests that recomputed the forecast"
            )
            .expect("Failed to register forecast_cache_misses"),

            model_trained: register_int_gauge_vec!(
                "energy_predictor_model_trained",
                "1 when the model has a trained generation installed",
                &["model"]
            )
            .expect("Failed to register model_trained"),
        }
    }
}

/// Predictor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct PredictorMetrics {
    _private: (),
}

impl Default for PredictorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PredictorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PredictorMetricsInner {
        GLOBAL_METRICS.get_or_init(PredictorMetricsInner::new)
    }

    pub fn observe_training_duration(&self, model: &str, duration_secs: f64) {
        self.inner()
            .training_duration_seconds
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    pub fn observe_prediction_latency(&self, operation: &str, duration_secs: f64) {
        self.inner()
            .prediction_latency_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn inc_training_failures(&self, model: &str) {
        self.inner().training_failures.with_label_values(&[model]).inc();
    }

    pub fn inc_job_failures(&self, job: &str) {
        self.inner().job_failures.with_label_values(&[job]).inc();
    }

    pub fn inc_tuning_runs(&self) {
        self.inner().tuning_runs.inc();
    }

    pub fn add_anomalies_detected(&self, count: u64) {
        self.inner().anomalies_detected.inc_by(count);
    }

    pub fn inc_cache_hits(&self) {
        self.inner().forecast_cache_hits.inc();
    }

    pub fn inc_cache_misses(&self) {
        self.inner().forecast_cache_misses.inc();
    }

    pub fn set_model_trained(&self, model: &str, trained: bool) {
        self.inner()
            .model_trained
            .with_label_values(&[model])
            .set(i64::from(trained));
    }
}

/// Structured logger for lifecycle events
///
/// Emits event-tagged records so training, tuning and detection outcomes can
/// be filtered in the JSON log stream.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn log_training_completed(&self, model: &str, data_points: usize, duration_secs: f64) {
        info!(
            event = "training_completed",
            service = %self.service_name,
            model = %model,
            data_points = data_points,
            duration_secs = duration_secs,
            "Model training completed"
        );
    }

    pub fn log_training_failed(&self, model: &str, error_code: &str, error: &str) {
        warn!(
            event = "training_failed",
            service = %self.service_name,
            model = %model,
            error_code = %error_code,
            error = %error,
            "Model training failed, keeping previous generation"
        );
    }

    pub fn log_tuning_completed(&self, forecast_mae: Option<f64>, anomaly_score: Option<f64>) {
        info!(
            event = "tuning_completed",
            service = %self.service_name,
            forecast_mae = ?forecast_mae,
            anomaly_score = ?anomaly_score,
            "Hyperparameter tuning completed"
        );
    }

    pub fn log_anomalies_detected(&self, count: usize, severity: &str, sensitivity: f64) {
        if severity == "high" {
            warn!(
                event = "anomalies_detected",
                service = %self.service_name,
                count = count,
                severity = %severity,
                sensitivity = sensitivity,
                "High-severity anomalies detected"
            );
        } else {
            info!(
                event = "anomalies_detected",
                service = %self.service_name,
                count = count,
                severity = %severity,
                sensitivity = sensitivity,
                "Anomaly detection completed"
            );
        }
    }

    pub fn log_startup(&self, version: &str, stale: bool) {
        info!(
            event = "service_started",
            service = %self.service_name,
            version = %version,
            models_stale = stale,
            "Energy predictor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Energy predictor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        // Registration happens once per process; further handles share it
        let metrics = PredictorMetrics::new();
        let again = PredictorMetrics::new();

        metrics.observe_training_duration("forecaster", 0.5);
        metrics.observe_prediction_latency("forecast", 0.002);
        metrics.inc_training_failures("anomaly_detector");
        metrics.inc_job_failures("train_models");
        again.inc_tuning_runs();
        again.add_anomalies_detected(3);
        again.inc_cache_hits();
        again.inc_cache_misses();
        again.set_model_trained("forecaster", true);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("energy-predictor");
        assert_eq!(logger.service_name, "energy-predictor");
    }
}
