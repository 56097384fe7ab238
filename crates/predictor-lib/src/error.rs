//! Error types for the model lifecycle engine

use thiserror::Error;

/// Errors raised by the models, the tuner and the orchestrator
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("Insufficient data: {actual} points available, {required} required")]
    InsufficientData { actual: usize, required: usize },

    #[error("Model '{model}' is not trained. Please wait for training to complete.")]
    ModelNotTrained { model: String },

    #[error("Training failed for model '{model}': {reason}")]
    ModelTrainingError { model: String, reason: String },

    #[error("Prediction failed for model '{model}' during {operation}: {reason}")]
    PredictionError {
        model: String,
        operation: String,
        reason: String,
    },

    #[error("Database connection failed: {message}")]
    DatabaseConnectionError { message: String },

    #[error("Resource limit exceeded for {resource}: {limit}")]
    ResourceLimitError { resource: String, limit: String },

    #[error("Invalid samples: {reason}")]
    InvalidSamples { reason: String },

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl PredictorError {
    /// Stable machine-readable code for the serving layer
    pub fn error_code(&self) -> &'static str {
        match self {
            PredictorError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            PredictorError::ModelNotTrained { .. } => "MODEL_NOT_TRAINED",
            PredictorError::ModelTrainingError { .. } => "MODEL_TRAINING_ERROR",
            PredictorError::PredictionError { .. } => "PREDICTION_ERROR",
            PredictorError::DatabaseConnectionError { .. } => "DATABASE_CONNECTION_ERROR",
            PredictorError::ResourceLimitError { .. } => "RESOURCE_LIMIT_EXCEEDED",
            PredictorError::InvalidSamples { .. } => "INVALID_SAMPLES",
            PredictorError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            PredictorError::Io { .. } | PredictorError::Json { .. } => "PERSISTENCE_ERROR",
        }
    }

    pub(crate) fn not_trained(model: &str) -> Self {
        PredictorError::ModelNotTrained {
            model: model.to_string(),
        }
    }

    pub(crate) fn training(model: &str, reason: impl ToString) -> Self {
        PredictorError::ModelTrainingError {
            model: model.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn prediction(model: &str, operation: &str, reason: impl ToString) -> Self {
        PredictorError::PredictionError {
            model: model.to_string(),
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PredictorError>;
