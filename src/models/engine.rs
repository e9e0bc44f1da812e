use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use super::{direction_probability, z_score, ModelArtifact};
use crate::config::ForecastSettings;
use crate::database::Database;
use crate::error::{PipelineError, Result};
use crate::registry::ModelRegistry;
use crate::types::time::{business_days_after, truncate_secs};
use crate::types::{Direction, ModelSelector, Prediction};

/// Produces predictions from the production version of a model. Never persists.
#[derive(Clone)]
pub struct ForecastEngine {
    db: Database,
    registry: ModelRegistry,
    settings: ForecastSettings,
    history_days: i64,
}

impl ForecastEngine {
    pub fn new(db: Database, registry: ModelRegistry, settings: ForecastSettings, history_days: i64) -> Self {
        Self {
            db,
            registry,
            settings,
            history_days,
        }
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub async fn forecast(&self, symbol: &str, horizon_days: usize, selector: ModelSelector) -> Result<Vec<Prediction>> {
        self.forecast_as_of(symbol, horizon_days, selector, Utc::now()).await
    }

    /// Forecast as seen at `as_of`: only bars at or before it are read, and every
    /// target is a weekday strictly after both `as_of` and the last bar.
    pub async fn forecast_as_of(
        &self,
        symbol: &str,
        horizon_days: usize,
        selector: ModelSelector,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Prediction>> {
        if horizon_days == 0 {
            return Err(PipelineError::Model("horizon must be at least one day".to_string()));
        }

        let model_name = selector.model_name();
        let metadata = match self.registry.get_production(model_name).await {
            Ok(m) => m,
            Err(PipelineError::NotFound(_)) => {
                return Err(PipelineError::StaleModel {
                    model_name: model_name.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let artifact_json = metadata.artifact.as_deref().ok_or_else(|| {
            PipelineError::Model(format!("{} {} has no stored artifact", model_name, metadata.model_version))
        })?;
        let artifact = ModelArtifact::from_json(artifact_json)?;
        if artifact.model_type() != selector.model_type() {
            return Err(PipelineError::Model(format!(
                "{} {} holds a {} artifact",
                model_name,
                metadata.model_version,
                artifact.model_type().as_str()
            )));
        }
        // Inference recomputes features with the current engine, so the model
        // must have been trained on the same feature version
        if let Some(expected) = artifact.feature_version() {
            if metadata.feature_version.as_deref() != Some(expected) {
                return Err(PipelineError::Model(format!(
                    "{} {} was trained on feature version {:?}, current is {}",
                    model_name, metadata.model_version, metadata.feature_version, expected
                )));
            }
        }
        let model = artifact.as_model();

        let since = as_of - Duration::days(self.history_days);
        let series = self.db.get_bars(symbol, Some(since), as_of).await?;
        let required = model.min_history();
        let last = match series.last() {
            Some(bar) if series.len() >= required => bar.clone(),
            _ => {
                return Err(PipelineError::InsufficientHistory {
                    symbol: symbol.to_string(),
                    required,
                    available: series.len(),
                })
            }
        };

        let path = model.forecast_path(&series.bars, horizon_days)?;
        let targets = business_days_after(last.timestamp, as_of, horizon_days);
        let prediction_timestamp = truncate_secs(as_of);
        let last_close = last.close_f64();
        let z = z_score(self.settings.confidence_level)?;

        let mut predictions = Vec::with_capacity(horizon_days);
        for (step, target) in path.iter().zip(targets) {
            let half_width = z * step.std_dev;
            let prediction = Prediction {
                symbol: symbol.to_string(),
                prediction_timestamp,
                target_timestamp: target,
                predicted_price: to_price(step.mean)?,
                confidence_lower: to_price(step.mean - half_width)?,
                confidence_upper: to_price(step.mean + half_width)?,
                confidence_level: self.settings.confidence_level,
                model_name: model_name.to_string(),
                model_version: metadata.model_version.clone(),
                feature_version: metadata.feature_version.clone(),
                predicted_direction: Direction::classify(step.mean, last_close, self.settings.neutral_band),
                direction_probability: direction_probability(step.mean, last_close, step.std_dev)?,
                actual_price: None,
                prediction_error: None,
                direction_correct: None,
            };
            prediction.validate()?;
            predictions.push(prediction);
        }

        debug!(
            symbol,
            model = model_name,
            version = %metadata.model_version,
            steps = predictions.len(),
            "Generated forecast"
        );
        Ok(predictions)
    }
}

fn to_price(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(4))
        .ok_or_else(|| PipelineError::Model(format!("cannot represent {} as a price", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::ModelTrainer;
    use crate::types::bar::test_support::{day, rising_bars};
    use crate::types::time::is_weekday;

    async fn setup(bars: usize) -> (Database, ModelRegistry, ForecastEngine) {
        let db = Database::in_memory().await.unwrap();
        db.insert_bars(&rising_bars("X", bars, 100.0, 160.0)).await.unwrap();
        let registry = ModelRegistry::new(db.clone());
        let config = PipelineConfig::default();
        let engine = ForecastEngine::new(
            db.clone(),
            registry.clone(),
            config.forecast.clone(),
            config.orchestrator.history_window_days,
        );
        (db, registry, engine)
    }

    #[tokio::test]
    async fn test_missing_production_model_is_stale() {
        let (_, _, engine) = setup(60).await;
        let err = engine
            .forecast_as_of("X", 5, ModelSelector::Baseline, day(59) + Duration::hours(21))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StaleModel { .. }));
    }

    #[tokio::test]
    async fn test_rising_series_forecasts_up_within_band() {
        let (db, registry, engine) = setup(60).await;
        let trainer = ModelTrainer::new(db, registry.clone(), PipelineConfig::default());
        let outcome = trainer.train(ModelSelector::Baseline, "X", day(59)).await.unwrap();
        registry
            .promote("baseline_arima", &outcome.metadata.model_version)
            .await
            .unwrap();

        let as_of = day(59) + Duration::hours(21);
        let predictions = engine
            .forecast_as_of("X", 5, ModelSelector::Baseline, as_of)
            .await
            .unwrap();

        assert_eq!(predictions.len(), 5);
        for p in &predictions {
            assert_eq!(p.predicted_direction, Direction::Up);
            assert!(p.confidence_lower <= p.predicted_price);
            assert!(p.predicted_price <= p.confidence_upper);
            assert!(p.target_timestamp > p.prediction_timestamp);
            assert!(is_weekday(p.target_timestamp.date_naive()));
            assert!(p.direction_probability > 0.5 && p.direction_probability <= 1.0);
            assert_eq!(p.model_version, "1.0.0");
        }
        for pair in predictions.windows(2) {
            assert!(pair[1].target_timestamp > pair[0].target_timestamp);
            let width = |p: &Prediction| p.confidence_upper - p.confidence_lower;
            assert!(width(&pair[1]) >= width(&pair[0]));
        }
    }

    async fn promote_advanced(db: &Database, registry: &ModelRegistry) {
        let trainer = ModelTrainer::new(db.clone(), registry.clone(), PipelineConfig::default());
        let outcome = trainer.train(ModelSelector::Advanced, "X", day(149)).await.unwrap();
        registry
            .promote("advanced_gbm", &outcome.metadata.model_version)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_advanced_window_shorter_than_lookback_is_insufficient_history() {
        let (db, registry, engine) = setup(150).await;
        promote_advanced(&db, &registry).await;

        // 45 bars cover less than the 50-bar feature lookback
        let err = engine
            .forecast_as_of("X", 5, ModelSelector::Advanced, day(44) + Duration::hours(21))
            .await
            .unwrap_err();
        match err {
            PipelineError::InsufficientHistory { required, available, .. } => {
                assert_eq!(available, 45);
                assert!(required > crate::features::LONGEST_LOOKBACK);
            }
            other => panic!("unexpected error: {}", other),
        }

        let predictions = engine
            .forecast_as_of("X", 5, ModelSelector::Advanced, day(149) + Duration::hours(21))
            .await
            .unwrap();
        assert_eq!(predictions.len(), 5);
        assert!(predictions.iter().all(|p| p.feature_version.as_deref() == Some("v1")));
    }

    #[tokio::test]
    async fn test_advanced_model_on_other_feature_version_is_rejected() {
        let (db, registry, engine) = setup(150).await;
        promote_advanced(&db, &registry).await;
        sqlx::query("UPDATE model_metadata SET feature_version = 'v0' WHERE model_name = 'advanced_gbm'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = engine
            .forecast_as_of("X", 5, ModelSelector::Advanced, day(149) + Duration::hours(21))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Model(ref m) if m.contains("feature version")));
    }

    #[tokio::test]
    async fn test_short_window_is_insufficient_history() {
        let (db, registry, engine) = setup(60).await;
        let trainer = ModelTrainer::new(db, registry.clone(), PipelineConfig::default());
        trainer.train(ModelSelector::Baseline, "X", day(59)).await.unwrap();
        registry.promote("baseline_arima", "1.0.0").await.unwrap();

        // Only the first ten bars are visible at this point in time
        let err = engine
            .forecast_as_of("X", 5, ModelSelector::Baseline, day(9) + Duration::hours(21))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientHistory { available: 10, .. }));
    }
}
