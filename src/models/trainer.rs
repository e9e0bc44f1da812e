use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::{FitReport, GradientBoostingModel, ModelArtifact, SarimaModel};
use crate::config::PipelineConfig;
use crate::database::Database;
use crate::error::{PipelineError, Result};
use crate::features::{materialize_features, FeatureEngine};
use crate::registry::ModelRegistry;
use crate::types::{ModelMetadata, ModelSelector, ModelStatus, FEATURE_VERSION};

/// A freshly registered model version.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub metadata: ModelMetadata,
}

/// Fits a model on one symbol's history and registers it as `testing`.
pub struct ModelTrainer {
    db: Database,
    registry: ModelRegistry,
    config: PipelineConfig,
}

impl ModelTrainer {
    pub fn new(db: Database, registry: ModelRegistry, config: PipelineConfig) -> Self {
        Self { db, registry, config }
    }

    pub async fn train(&self, selector: ModelSelector, symbol: &str, as_of: DateTime<Utc>) -> Result<TrainingOutcome> {
        let since = as_of - Duration::days(self.config.orchestrator.history_window_days);
        let series = self.db.get_bars(symbol, Some(since), as_of).await?;
        if series.is_empty() {
            return Err(PipelineError::InsufficientHistory {
                symbol: symbol.to_string(),
                required: 1,
                available: 0,
            });
        }

        let (artifact, report, hyperparameters, feature_version) = match selector {
            ModelSelector::Baseline => {
                let (model, report) = SarimaModel::fit(&series.bars, &self.config.baseline)?;
                let params = serde_json::to_value(&self.config.baseline)?;
                (ModelArtifact::Sarima(model), report, params, None)
            }
            ModelSelector::Advanced => {
                let engine = FeatureEngine::new(self.config.features.clone());
                materialize_features(&self.db, &engine, &self.config.universe, symbol, Some(since), as_of).await?;
                let features = self.db.get_features(symbol, FEATURE_VERSION, as_of).await?;

                let (model, report) =
                    GradientBoostingModel::fit(&series.bars, &features, &self.config.advanced, &self.config.features)?;
                let params = serde_json::to_value(&self.config.advanced)?;
                (
                    ModelArtifact::GradientBoosting(model),
                    report,
                    params,
                    Some(FEATURE_VERSION.to_string()),
                )
            }
        };

        let FitReport {
            training_samples,
            metrics,
            feature_importance,
        } = report;
        let version = self.registry.suggest_next_version(selector.model_name()).await?;

        let metadata = ModelMetadata {
            model_name: selector.model_name().to_string(),
            model_version: version.to_string(),
            model_type: selector.model_type(),
            trained_at: Utc::now(),
            training_data_start: series.bars.first().map(|b| b.timestamp),
            training_data_end: series.last().map(|b| b.timestamp),
            training_samples,
            feature_version,
            hyperparameters,
            metrics,
            feature_importance,
            status: ModelStatus::Testing,
            is_production: false,
            artifact: Some(artifact.to_json()?),
        };
        self.registry.register(&metadata).await?;

        info!(
            model = %metadata.model_name,
            version = %metadata.model_version,
            symbol,
            samples = metadata.training_samples,
            val_rmse = ?metadata.metrics.val_rmse,
            "Trained model"
        );
        Ok(TrainingOutcome { metadata })
    }
}
