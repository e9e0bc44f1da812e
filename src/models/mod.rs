pub mod advanced;
pub mod baseline;
pub mod engine;
pub mod linalg;
pub mod metrics;
pub mod trainer;

pub use advanced::GradientBoostingModel;
pub use baseline::SarimaModel;
pub use engine::ForecastEngine;
pub use trainer::ModelTrainer;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::types::{MarketBar, ModelType, TrainingMetrics, FEATURE_VERSION};

/// Point forecast and predictive standard deviation for one horizon step, in price units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepForecast {
    pub mean: f64,
    pub std_dev: f64,
}

/// What a fit produced besides the model itself.
#[derive(Debug, Clone, Default)]
pub struct FitReport {
    pub training_samples: usize,
    pub metrics: TrainingMetrics,
    pub feature_importance: BTreeMap<String, f64>,
}

/// A fitted model that can project a price path from trailing bars.
pub trait ForecastModel: Send + Sync {
    fn model_type(&self) -> ModelType;

    /// Bars needed before the model will forecast.
    fn min_history(&self) -> usize;

    /// `horizon` successive steps after the last bar in `bars`.
    fn forecast_path(&self, bars: &[MarketBar], horizon: usize) -> Result<Vec<StepForecast>>;
}

/// Serialized form stored alongside the registry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Sarima(SarimaModel),
    GradientBoosting(GradientBoostingModel),
}

impl ModelArtifact {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn model_type(&self) -> ModelType {
        self.as_model().model_type()
    }

    /// Feature version the model's inputs come from, if it consumes engineered features.
    pub fn feature_version(&self) -> Option<&'static str> {
        match self {
            ModelArtifact::Sarima(_) => None,
            ModelArtifact::GradientBoosting(_) => Some(FEATURE_VERSION),
        }
    }

    pub fn as_model(&self) -> &dyn ForecastModel {
        match self {
            ModelArtifact::Sarima(m) => m,
            ModelArtifact::GradientBoosting(m) => m,
        }
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| PipelineError::Model(e.to_string()))
}

/// Two-sided z multiplier for a central interval at `level` (e.g. 0.95 -> 1.96).
pub fn z_score(level: f64) -> Result<f64> {
    if !(level > 0.0 && level < 1.0) {
        return Err(PipelineError::Model(format!("confidence level {} outside (0, 1)", level)));
    }
    Ok(standard_normal()?.inverse_cdf(0.5 + level / 2.0))
}

/// Φ(|predicted − reference| / σ): 0.5 on the neutral boundary, rising toward 1 with distance.
pub fn direction_probability(predicted: f64, reference: f64, std_dev: f64) -> Result<f64> {
    let distance = (predicted - reference).abs();
    if !distance.is_finite() {
        return Err(PipelineError::Model("non-finite forecast".to_string()));
    }
    if std_dev <= 0.0 || !std_dev.is_finite() {
        return Ok(if distance > 0.0 { 1.0 } else { 0.5 });
    }
    Ok(standard_normal()?.cdf(distance / std_dev).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z_score_for_common_levels() {
        assert!((z_score(0.95).unwrap() - 1.959964).abs() < 1e-4);
        assert!((z_score(0.80).unwrap() - 1.281552).abs() < 1e-4);
        assert!(z_score(1.0).is_err());
    }

    #[test]
    fn test_direction_probability_is_monotone() {
        let near = direction_probability(100.5, 100.0, 2.0).unwrap();
        let far = direction_probability(104.0, 100.0, 2.0).unwrap();
        let below = direction_probability(96.0, 100.0, 2.0).unwrap();
        assert!((direction_probability(100.0, 100.0, 2.0).unwrap() - 0.5).abs() < 1e-12);
        assert!(near > 0.5 && far > near);
        assert!((far - below).abs() < 1e-12);
        assert!(far <= 1.0);
    }
}
