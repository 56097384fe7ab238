//! Hyperparameter sets, search grids and the persisted tuning record

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// How seasonal terms combine with the trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

/// Trend component the ETS model may select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendKind {
    /// Level only
    None,
    Additive,
    /// Chosen by information criterion
    Auto,
}

impl TrendKind {
    /// Error, trend and season letters of the ETS model search
    pub fn ets_spec(self) -> &'static str {
        match self {
            TrendKind::None => "ZNN",
            TrendKind::Additive => "ZAN",
            TrendKind::Auto => "ZZN",
        }
    }
}

/// Parameters of the seasonal forecasting model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastParams {
    pub trend: TrendKind,
    pub seasonality_mode: SeasonalityMode,
    pub daily_seasonality: bool,
    pub weekly_seasonality: bool,
    pub yearly_seasonality: bool,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            trend: TrendKind::Auto,
            seasonality_mode: SeasonalityMode::Additive,
            daily_seasonality: true,
            weekly_seasonality: true,
            yearly_seasonality: false,
        }
    }
}

/// Expected share of outliers in the training data
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contamination {
    /// Fixed decision offset of -0.5 on the raw score
    Auto,
    /// Offset placed at this quantile of the training scores
    Fraction(f64),
}

impl Serialize for Contamination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Contamination::Auto => serializer.serialize_str("auto"),
            Contamination::Fraction(f) => serializer.serialize_f64(*f),
        }
    }
}

impl<'de> Deserialize<'de> for Contamination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) if s == "auto" => Ok(Contamination::Auto),
            serde_json::Value::Number(n) => {
                let f = n
                    .as_f64()
                    .ok_or_else(|| D::Error::custom("contamination is not a float"))?;
                if f > 0.0 && f <= 0.5 {
                    Ok(Contamination::Fraction(f))
                } else {
                    Err(D::Error::custom(format!(
                        "contamination {} outside (0, 0.5]",
                        f
                    )))
                }
            }
            other => Err(D::Error::custom(format!(
                "invalid contamination value {}",
                other
            ))),
        }
    }
}

/// Parameters of the isolation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyParams {
    pub n_estimators: usize,
    pub contamination: Contamination,
    /// Fraction of feature columns each tree may split on
    pub max_features: f64,
    pub random_state: u64,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            contamination: Contamination::Auto,
            max_features: 1.0,
            random_state: 42,
        }
    }
}

/// Model family a tuning run or history entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Forecast,
    Anomaly,
}

/// Search space for the forecasting model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastGrid {
    pub trend: Vec<TrendKind>,
    pub seasonality_mode: Vec<SeasonalityMode>,
    pub weekly_seasonality: Vec<bool>,
}

impl ForecastGrid {
    /// Every combination, with the non-searched fields at their defaults
    pub fn combinations(&self) -> Vec<ForecastParams> {
        let mut out = Vec::with_capacity(self.len());
        for &trend in &self.trend {
            for &mode in &self.seasonality_mode {
                for &weekly in &self.weekly_seasonality {
                    out.push(ForecastParams {
                        trend,
                        seasonality_mode: mode,
                        weekly_seasonality: weekly,
                        ..ForecastParams::default()
                    });
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.trend.len() * self.seasonality_mode.len() * self.weekly_seasonality.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ForecastGrid {
    fn default() -> Self {
        Self {
            trend: vec![TrendKind::None, TrendKind::Additive, TrendKind::Auto],
            seasonality_mode: vec![SeasonalityMode::Additive, SeasonalityMode::Multiplicative],
            weekly_seasonality: vec![true, false],
        }
    }
}

/// Search space for the isolation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyGrid {
    pub n_estimators: Vec<usize>,
    pub contamination: Vec<Contamination>,
    pub max_features: Vec<f64>,
}

impl AnomalyGrid {
    pub fn combinations(&self) -> Vec<AnomalyParams> {
        let mut out = Vec::with_capacity(self.len());
        for &n_estimators in &self.n_estimators {
            for &contamination in &self.contamination {
                for &max_features in &self.max_features {
                    out.push(AnomalyParams {
                        n_estimators,
                        contamination,
                        max_features,
                        ..AnomalyParams::default()
                    });
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.n_estimators.len() * self.contamination.len() * self.max_features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AnomalyGrid {
    fn default() -> Self {
        // Contamination capped at 2% to keep the forest from over-flagging
        Self {
            n_estimators: vec![50, 100, 200],
            contamination: vec![
                Contamination::Fraction(0.005),
                Contamination::Fraction(0.01),
                Contamination::Fraction(0.02),
            ],
            max_features: vec![0.5, 0.75, 1.0],
        }
    }
}

/// Winning parameters of a tuning run, as persisted between restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast: Option<ForecastParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyParams>,
    pub tuned_at: DateTime<Utc>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// One evaluated combination, kept for diagnostics only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningHistoryEntry {
    pub model_kind: ModelKind,
    pub params: serde_json::Value,
    pub metric: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid_sizes() {
        assert_eq!(ForecastGrid::default().len(), 12);
        assert_eq!(ForecastGrid::default().combinations().len(), 12);
        assert_eq!(AnomalyGrid::default().len(), 27);
        assert_eq!(AnomalyGrid::default().combinations().len(), 27);
    }

    #[test]
    fn test_combinations_keep_defaults_for_fixed_fields() {
        let grid = ForecastGrid {
            trend: vec![TrendKind::Additive],
            seasonality_mode: vec![SeasonalityMode::Multiplicative],
            weekly_seasonality: vec![false],
        };
        let combos = grid.combinations();
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].trend.ets_spec(), "ZAN");
        assert!(!combos[0].weekly_seasonality);
        assert!(combos[0].daily_seasonality);
        assert!(!combos[0].yearly_seasonality);
        assert_eq!(combos[0].seasonality_mode, SeasonalityMode::Multiplicative);
    }

    #[test]
    fn test_empty_axis_yields_nothing() {
        let grid = AnomalyGrid {
            n_estimators: vec![],
            ..AnomalyGrid::default()
        };
        assert!(grid.is_empty());
        assert!(grid.combinations().is_empty());
    }

    #[test]
    fn test_contamination_serde() {
        assert_eq!(serde_json::to_string(&Contamination::Auto).unwrap(), "\"auto\"");
        assert_eq!(
            serde_json::from_str::<Contamination>("0.01").unwrap(),
            Contamination::Fraction(0.01)
        );
        assert_eq!(
            serde_json::from_str::<Contamination>("\"auto\"").unwrap(),
            Contamination::Auto
        );
        assert!(serde_json::from_str::<Contamination>("0.9").is_err());
        assert!(serde_json::from_str::<Contamination>("\"often\"").is_err());
    }

    #[test]
    fn test_record_serializes_as_mappings() {
        let record = HyperparameterRecord {
            forecast: Some(ForecastParams::default()),
            anomaly: Some(AnomalyParams::default()),
            tuned_at: Utc::now(),
            metrics: BTreeMap::from([("forecast_mae".to_string(), 12.5)]),
        };
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["forecast"]["seasonality_mode"], "additive");
        assert_eq!(json["forecast"]["trend"], "auto");
        assert_eq!(json["anomaly"]["contamination"], "auto");
        assert!(json["tuned_at"].is_string());
        assert_eq!(json["metrics"]["forecast_mae"], 12.5);
    }

    #[test]
    fn test_partial_record_loads() {
        let json = r#"{"forecast": {"trend": "none"}, "tuned_at": "2024-01-01T00:00:00Z"}"#;
        let record: HyperparameterRecord = serde_json::from_str(json).unwrap();
        let forecast = record.forecast.unwrap();
        assert_eq!(forecast.trend, TrendKind::None);
        assert_eq!(forecast.seasonality_mode, SeasonalityMode::Additive);
        assert!(forecast.weekly_seasonality);
        assert!(record.anomaly.is_none());
        assert!(record.metrics.is_empty());
    }
}
