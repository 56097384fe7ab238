//! Component health and readiness for the energy predictor
//!
//! Model components remember when the generation they serve was trained.
//! Liveness degrades on a failed training run but stays up while a previous
//! model is still served; readiness additionally requires that startup has
//! finished and that at least one model can answer requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component status, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, e.g. an untrained model or one kept after a failed retrain
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
    /// Training time of the generation being served; model components only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_trained_at: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: Utc::now(),
            model_trained_at: None,
        }
    }

    pub fn is_serving_model(&self) -> bool {
        self.model_trained_at.is_some()
    }
}

/// Body of the liveness endpoint; the worst component decides `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    pub fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Model components with a trained generation
    pub serving_models: Vec<String>,
}

pub mod components {
    pub const FORECASTER: &str = "forecaster";
    pub const ANOMALY_DETECTOR: &str = "anomaly_detector";
    pub const SCHEDULER: &str = "scheduler";
    pub const DATA_SOURCE: &str = "data_source";

    pub const MODELS: [&str; 2] = [FORECASTER, ANOMALY_DETECTOR];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    started: bool,
}

impl RegistryState {
    /// Replace status and message, keeping the served model generation
    fn set(&mut self, name: &str, status: ComponentStatus, message: Option<String>) {
        let trained_at = self
            .components
            .get(name)
            .and_then(|c| c.model_trained_at);
        let mut health = ComponentHealth::new(status, message);
        health.model_trained_at = trained_at;
        self.components.insert(name.to_string(), health);
    }

    fn serving_models(&self) -> Vec<String> {
        components::MODELS
            .iter()
            .filter(|name| {
                self.components
                    .get(**name)
                    .map_or(false, ComponentHealth::is_serving_model)
            })
            .map(|name| name.to_string())
            .collect()
    }
}

/// Shared, cloneable view of every tracked component
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` as healthy unless it already has a status
    pub async fn register(&self, name: &str) {
        let mut state = self.state.write().await;
        state
            .components
            .entry(name.to_string())
            .or_insert_with(|| ComponentHealth::new(ComponentStatus::Healthy, None));
    }

    pub async fn set_healthy(&self, name: &str) {
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Healthy, None);
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Degraded, Some(message.into()));
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Unhealthy, Some(message.into()));
    }

    /// A new generation of model `name` is installed
    pub async fn model_trained(&self, name: &str, trained_at: DateTime<Utc>) {
        let mut health = ComponentHealth::new(ComponentStatus::Healthy, None);
        health.model_trained_at = Some(trained_at);
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    /// A training run of model `name` failed
    ///
    /// `serving_since` is the training time of the generation still installed,
    /// if there is one.
    pub async fn model_training_failed(
        &self,
        name: &str,
        serving_since: Option<DateTime<Utc>>,
        error: impl fmt::Display,
    ) {
        let message = match serving_since {
            Some(_) => format!("last training failed, serving previous model: {}", error),
            None => format!("not trained: {}", error),
        };
        let mut health = ComponentHealth::new(ComponentStatus::Degraded, Some(message));
        health.model_trained_at = serving_since;
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    /// Mark startup as finished, or the service as shutting down
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse::from_components(components)
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let serving_models = state.serving_models();
        let unhealthy = state
            .components
            .iter()
            .find(|(_, c)| !c.status.is_operational());

        let reason = if !state.started {
            Some("Service not yet initialized".to_string())
        } else if let Some((name, health)) = unhealthy {
            Some(format!(
                "{} unhealthy: {}",
                name,
                health.message.as_deref().unwrap_or("no details")
            ))
        } else if serving_models.is_empty() {
            Some("No trained model available".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
            serving_models,
        }
    }
}
