//! Service configuration

use anyhow::Result;
use predictor_lib::anomaly::DetectorConfig;
use predictor_lib::data::StoreConfig;
use predictor_lib::lifecycle::SchedulerConfig;
use predictor_lib::predictor::ForecastConfig;
use predictor_lib::tuning::TunerConfig;
use predictor_lib::worker::DEFAULT_WORKER_THREADS;
use serde::Deserialize;
use std::path::PathBuf;

/// Service configuration
///
/// Nested sections map onto the library config structs; anything left out
/// keeps its default.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Name attached to structured log records
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON array of samples loaded into the store at startup
    #[serde(default)]
    pub seed_file: Option<PathBuf>,

    /// Permits of the CPU offload pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub tuner: TunerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

fn default_service_name() -> String {
    "energy-predictor".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            api_port: default_api_port(),
            seed_file: None,
            worker_threads: default_worker_threads(),
            forecast: ForecastConfig::default(),
            detector: DetectorConfig::default(),
            tuner: TunerConfig::default(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Environment keys use the `PREDICTOR` prefix with `__` between nested
    /// keys, e.g. `PREDICTOR_API_PORT` or `PREDICTOR_SCHEDULER__RETRAIN_INTERVAL_HOURS`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PREDICTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder.build()?;
        let service: ServiceConfig = config.try_deserialize()?;
        service.validate()?;
        Ok(service)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            anyhow::bail!("worker_threads must be at least 1");
        }
        if self.forecast.max_forecast_hours == 0 {
            anyhow::bail!("forecast.max_forecast_hours must be at least 1");
        }
        if self.scheduler.retrain_interval_hours == 0 {
            anyhow::bail!("scheduler.retrain_interval_hours must be at least 1");
        }
        if self.scheduler.enable_auto_tuning && self.scheduler.tuning_interval_days == 0 {
            anyhow::bail!("scheduler.tuning_interval_days must be at least 1");
        }
        Ok(())
    }
}
