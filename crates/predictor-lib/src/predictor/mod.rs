//! Seasonal forecasting engine

mod cache;
mod forecaster;
mod seasonal;

pub use cache::{ForecastCache, ForecastCacheEntry};
pub use forecaster::{ForecastConfig, ForecastStats, Forecaster, FORECAST_MODEL};
pub use seasonal::{Estimate, FitError, SeasonalModel};
