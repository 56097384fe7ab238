//! Hyperparameter search with time-series cross-validation

mod cross_validation;
mod params;
mod tuner;

pub use cross_validation::{
    CrossValidationFold, FoldInfo, Folds, TimeSeriesCrossValidator, DEFAULT_MIN_TRAIN_DAYS,
    DEFAULT_N_SPLITS, DEFAULT_VALIDATION_DAYS,
};
pub use params::{
    AnomalyGrid, AnomalyParams, Contamination, ForecastGrid, ForecastParams,
    HyperparameterRecord, ModelKind, SeasonalityMode, TrendKind, TuningHistoryEntry,
};
pub use tuner::{HyperparameterTuner, TunerConfig, TUNER_MODEL};
