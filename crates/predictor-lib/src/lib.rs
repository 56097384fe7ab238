//! Energy consumption forecasting and anomaly detection
//!
//! This crate provides the core functionality for:
//! - Feature extraction over power samples
//! - Seasonal forecasting with a cached forecast path
//! - Isolation-forest anomaly detection with an adaptive threshold
//! - Time-series cross-validation and hyperparameter tuning
//! - Scheduled retraining, health checks and observability

pub mod anomaly;
pub mod data;
pub mod error;
pub mod features;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod tuning;
pub mod worker;

pub use error::{PredictorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{ModelOrchestrator, SchedulerConfig};
pub use models::*;
pub use observability::{PredictorMetrics, StructuredLogger};
