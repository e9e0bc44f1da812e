use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Model family identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    Sarima,
    GradientBoosting,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Sarima => "sarima",
            ModelType::GradientBoosting => "gradient_boosting",
        }
    }
}

impl FromStr for ModelType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sarima" => Ok(ModelType::Sarima),
            "gradient_boosting" => Ok(ModelType::GradientBoosting),
            _ => Err(PipelineError::NotFound(format!("Unknown model type: {}", s))),
        }
    }
}

/// Which competing model a forecast request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSelector {
    Baseline,
    Advanced,
}

impl ModelSelector {
    pub const ALL: [ModelSelector; 2] = [ModelSelector::Baseline, ModelSelector::Advanced];

    /// Registry name for the selector.
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelSelector::Baseline => "baseline_arima",
            ModelSelector::Advanced => "advanced_gbm",
        }
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            ModelSelector::Baseline => ModelType::Sarima,
            ModelSelector::Advanced => ModelType::GradientBoosting,
        }
    }
}

impl FromStr for ModelSelector {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "baseline" | "baseline_arima" => Ok(ModelSelector::Baseline),
            "advanced" | "advanced_gbm" => Ok(ModelSelector::Advanced),
            _ => Err(PipelineError::NotFound(format!("Unknown model selector: {}", s))),
        }
    }
}

/// Semantic version for models.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn bump_minor(&self) -> Self {
        Self::new(self.major, self.minor + 1, 0)
    }

    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl FromStr for ModelVersion {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim_start_matches('v').split('.').collect();
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| PipelineError::NotFound(format!("Invalid version format: {}", s)))
        };
        if parts.len() != 3 {
            return Err(PipelineError::NotFound(format!("Invalid version format: {}", s)));
        }
        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Active,
    Archived,
    Testing,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Active => "active",
            ModelStatus::Archived => "archived",
            ModelStatus::Testing => "testing",
        }
    }
}

impl FromStr for ModelStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ModelStatus::Active),
            "archived" => Ok(ModelStatus::Archived),
            "testing" => Ok(ModelStatus::Testing),
            _ => Err(PipelineError::NotFound(format!("Unknown model status: {}", s))),
        }
    }
}

/// Error metrics recorded at training time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub train_rmse: Option<f64>,
    pub train_mae: Option<f64>,
    pub train_r2: Option<f64>,
    pub val_rmse: Option<f64>,
    pub val_mae: Option<f64>,
    pub val_r2: Option<f64>,
    pub directional_accuracy: Option<f64>,
}

/// Registry row describing one trained model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_name: String,
    pub model_version: String,
    pub model_type: ModelType,
    pub trained_at: DateTime<Utc>,
    pub training_data_start: Option<DateTime<Utc>>,
    pub training_data_end: Option<DateTime<Utc>>,
    pub training_samples: usize,
    pub feature_version: Option<String>,
    pub hyperparameters: serde_json::Value,
    pub metrics: TrainingMetrics,
    pub feature_importance: BTreeMap<String, f64>,
    pub status: ModelStatus,
    pub is_production: bool,
    /// Serialized fitted model; not part of the public JSON surface.
    #[serde(skip)]
    pub artifact: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_version_parsing() {
        let v = ModelVersion::from_str("1.2.3").unwrap();
        assert_eq!(v, ModelVersion::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!(ModelVersion::from_str("v2.0.1").unwrap(), ModelVersion::new(2, 0, 1));
        assert!(ModelVersion::from_str("1.2").is_err());
        assert!(ModelVersion::from_str("a.b.c").is_err());
    }

    #[test]
    fn test_version_bumps() {
        let v = ModelVersion::new(1, 2, 3);
        assert_eq!(v.bump_minor(), ModelVersion::new(1, 3, 0));
        assert_eq!(v.bump_patch(), ModelVersion::new(1, 2, 4));
        assert!(ModelVersion::new(1, 10, 0) > ModelVersion::new(1, 9, 9));
    }

    #[test]
    fn test_selector_names() {
        assert_eq!(ModelSelector::from_str("baseline").unwrap().model_name(), "baseline_arima");
        assert_eq!(ModelSelector::from_str("advanced_gbm").unwrap(), ModelSelector::Advanced);
        assert!(ModelSelector::from_str("lstm").is_err());
    }
}
