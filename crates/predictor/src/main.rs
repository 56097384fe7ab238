//! Energy Predictor - consumption forecasting and anomaly detection service
//!
//! Loads samples into the store, keeps both models trained on a schedule and
//! exposes health, readiness, status and metrics over HTTP.

use anyhow::Result;
use energy_predictor::{api, config::ServiceConfig};
use predictor_lib::{
    anomaly::AnomalyDetector,
    data::{DataSource, InMemorySampleStore},
    health::HealthRegistry,
    observability::StructuredLogger,
    predictor::Forecaster,
    tuning::HyperparameterTuner,
    worker::WorkerPool,
    ModelOrchestrator,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting energy-predictor");

    let config_path = std::env::args().nth(1);
    let config = ServiceConfig::load(config_path.as_deref())?;
    info!(
        service_name = %config.service_name,
        api_port = config.api_port,
        worker_threads = config.worker_threads,
        "Service configured"
    );

    let store = match &config.seed_file {
        Some(path) => InMemorySampleStore::from_json_file(path, config.store.clone()).await?,
        None => {
            warn!("No seed file configured, starting with an empty sample store");
            InMemorySampleStore::new(config.store.clone())
        }
    };
    let source: Arc<dyn DataSource> = Arc::new(store);
    match source.get_data_age_days().await {
        Ok(age_days) => info!(age_days, "Sample history available"),
        Err(e) => warn!(error = %e, "Could not read sample history age"),
    }

    let pool = WorkerPool::new(config.worker_threads);
    let tuner = Arc::new(HyperparameterTuner::new(config.tuner.clone(), pool.clone()));
    let forecaster = Arc::new(Forecaster::new(
        config.forecast.clone(),
        pool.clone(),
        tuner.clone(),
    ));
    let detector = Arc::new(AnomalyDetector::new(
        config.detector.clone(),
        pool.clone(),
        tuner.clone(),
    ));

    let health_registry = HealthRegistry::new();
    let logger = StructuredLogger::new(config.service_name.clone());

    let orchestrator = Arc::new(ModelOrchestrator::new(
        config.scheduler.clone(),
        source,
        forecaster,
        detector,
        tuner,
        health_registry.clone(),
    ));
    orchestrator.start().await?;

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        orchestrator.clone(),
    ));

    // Startup is done once jobs are scheduled; readiness still waits for a
    // trained model
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    logger.log_shutdown("API server failed");
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    logger.log_shutdown("API server task panicked");
                }
            }
        }
    }

    health_registry.set_ready(false).await;
    orchestrator.shutdown().await;
    pool.close();
    info!("Shutdown complete");

    Ok(())
}
