use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::database::Database;
use crate::error::{PipelineError, Result};
use crate::types::time::{fmt_ts, parse_ts};
use crate::types::{ModelMetadata, ModelStatus, ModelType, ModelVersion};

const METADATA_COLUMNS: &str = r#"
    model_name, model_version, model_type, trained_at, training_data_start, training_data_end,
    training_samples, feature_version, hyperparameters, metrics, feature_importance,
    status, is_production, artifact
"#;

/// Trained-model catalogue with a single production version per model name.
#[derive(Clone)]
pub struct ModelRegistry {
    db: Database,
    promote_lock: Arc<Mutex<()>>,
}

impl ModelRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            promote_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append-only: an existing (model_name, model_version) is rejected.
    /// The row is always stored as non-production; use [`promote`](Self::promote).
    pub async fn register(&self, metadata: &ModelMetadata) -> Result<()> {
        ModelVersion::from_str(&metadata.model_version)?;

        let result = sqlx::query(
            r#"
            INSERT INTO model_metadata (
                model_name, model_version, model_type, trained_at, training_data_start, training_data_end,
                training_samples, feature_version, hyperparameters, metrics, feature_importance,
                status, is_production, artifact, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&metadata.model_name)
        .bind(&metadata.model_version)
        .bind(metadata.model_type.as_str())
        .bind(fmt_ts(metadata.trained_at))
        .bind(metadata.training_data_start.map(fmt_ts))
        .bind(metadata.training_data_end.map(fmt_ts))
        .bind(metadata.training_samples as i64)
        .bind(&metadata.feature_version)
        .bind(serde_json::to_string(&metadata.hyperparameters)?)
        .bind(serde_json::to_string(&metadata.metrics)?)
        .bind(serde_json::to_string(&metadata.feature_importance)?)
        .bind(metadata.status.as_str())
        .bind(&metadata.artifact)
        .bind(fmt_ts(Utc::now()))
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => {
                info!(
                    model = %metadata.model_name,
                    version = %metadata.model_version,
                    status = metadata.status.as_str(),
                    "Registered model"
                );
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(PipelineError::DuplicateVersion {
                model_name: metadata.model_name.clone(),
                model_version: metadata.model_version.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// The production version, or `NotFound` when none is marked.
    pub async fn get_production(&self, model_name: &str) -> Result<ModelMetadata> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM model_metadata WHERE model_name = ? AND is_production = 1",
            METADATA_COLUMNS
        ))
        .bind(model_name)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => metadata_from_row(&row),
            None => Err(PipelineError::NotFound(format!("production model for {}", model_name))),
        }
    }

    pub async fn get(&self, model_name: &str, model_version: &str) -> Result<Option<ModelMetadata>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM model_metadata WHERE model_name = ? AND model_version = ?",
            METADATA_COLUMNS
        ))
        .bind(model_name)
        .bind(model_version)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(metadata_from_row).transpose()
    }

    /// All versions, newest training first. `None` lists every model name.
    pub async fn list(&self, model_name: Option<&str>) -> Result<Vec<ModelMetadata>> {
        let rows = match model_name {
            Some(name) => {
                sqlx::query(&format!(
                    "SELECT {} FROM model_metadata WHERE model_name = ? ORDER BY trained_at DESC",
                    METADATA_COLUMNS
                ))
                .bind(name)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM model_metadata ORDER BY model_name, trained_at DESC",
                    METADATA_COLUMNS
                ))
                .fetch_all(self.db.pool())
                .await?
            }
        };

        rows.iter().map(metadata_from_row).collect()
    }

    /// Makes `model_version` the only production version of `model_name`.
    ///
    /// Promotions are serialized in-process and applied in one transaction, so
    /// readers never observe zero or two production rows mid-switch.
    pub async fn promote(&self, model_name: &str, model_version: &str) -> Result<()> {
        let _guard = self.promote_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let exists: Option<String> = sqlx::query_scalar(
            "SELECT status FROM model_metadata WHERE model_name = ? AND model_version = ?",
        )
        .bind(model_name)
        .bind(model_version)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(PipelineError::NotFound(format!("model {} version {}", model_name, model_version)));
        }

        let now = fmt_ts(Utc::now());
        sqlx::query(
            "UPDATE model_metadata SET is_production = 0, updated_at = ? WHERE model_name = ? AND is_production = 1",
        )
        .bind(&now)
        .bind(model_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE model_metadata
            SET is_production = 1, status = 'active', updated_at = ?
            WHERE model_name = ? AND model_version = ?
            "#,
        )
        .bind(&now)
        .bind(model_name)
        .bind(model_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(model = %model_name, version = %model_version, "Promoted model to production");
        Ok(())
    }

    /// Status change; the production version cannot be archived.
    pub async fn set_status(&self, model_name: &str, model_version: &str, status: ModelStatus) -> Result<()> {
        let _guard = self.promote_lock.lock().await;

        let current = self
            .get(model_name, model_version)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("model {} version {}", model_name, model_version)))?;

        if current.is_production && status == ModelStatus::Archived {
            warn!(model = %model_name, version = %model_version, "Refusing to archive production model");
            return Err(PipelineError::Model(format!(
                "cannot archive production model {} {}; promote another version first",
                model_name, model_version
            )));
        }

        sqlx::query("UPDATE model_metadata SET status = ?, updated_at = ? WHERE model_name = ? AND model_version = ?")
            .bind(status.as_str())
            .bind(fmt_ts(Utc::now()))
            .bind(model_name)
            .bind(model_version)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Highest registered version with the patch bumped, or 1.0.0 for a new name.
    pub async fn suggest_next_version(&self, model_name: &str) -> Result<ModelVersion> {
        let versions: Vec<String> = sqlx::query_scalar("SELECT model_version FROM model_metadata WHERE model_name = ?")
            .bind(model_name)
            .fetch_all(self.db.pool())
            .await?;

        let latest = versions.iter().filter_map(|v| ModelVersion::from_str(v).ok()).max();
        Ok(match latest {
            Some(v) => v.bump_patch(),
            None => ModelVersion::initial(),
        })
    }
}

fn metadata_from_row(row: &SqliteRow) -> Result<ModelMetadata> {
    let status: String = row.get("status");
    Ok(ModelMetadata {
        model_name: row.get("model_name"),
        model_version: row.get("model_version"),
        model_type: ModelType::from_str(row.get("model_type"))?,
        trained_at: parse_ts(row.get("trained_at"))?,
        training_data_start: row
            .get::<Option<String>, _>("training_data_start")
            .as_deref()
            .map(parse_ts)
            .transpose()?,
        training_data_end: row
            .get::<Option<String>, _>("training_data_end")
            .as_deref()
            .map(parse_ts)
            .transpose()?,
        training_samples: row.get::<i64, _>("training_samples").max(0) as usize,
        feature_version: row.get("feature_version"),
        hyperparameters: serde_json::from_str(row.get("hyperparameters"))?,
        metrics: serde_json::from_str(row.get("metrics"))?,
        feature_importance: serde_json::from_str(row.get("feature_importance"))?,
        status: ModelStatus::from_str(&status)?,
        is_production: row.get::<i64, _>("is_production") == 1,
        artifact: row.get("artifact"),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::TrainingMetrics;
    use std::collections::BTreeMap;

    pub fn metadata(model_name: &str, model_version: &str) -> ModelMetadata {
        ModelMetadata {
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            model_type: ModelType::Sarima,
            trained_at: Utc::now(),
            training_data_start: None,
            training_data_end: None,
            training_samples: 100,
            feature_version: None,
            hyperparameters: serde_json::json!({ "p": 2, "d": 1, "q": 2 }),
            metrics: TrainingMetrics {
                val_rmse: Some(1.25),
                ..TrainingMetrics::default()
            },
            feature_importance: BTreeMap::new(),
            status: ModelStatus::Testing,
            is_production: false,
            artifact: Some("{}".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::metadata;
    use super::*;

    async fn registry() -> ModelRegistry {
        ModelRegistry::new(Database::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_version() {
        let registry = registry().await;
        registry.register(&metadata("baseline_arima", "1.0.0")).await.unwrap();

        let err = registry.register(&metadata("baseline_arima", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateVersion { .. }));

        let stored = registry.get("baseline_arima", "1.0.0").await.unwrap().unwrap();
        assert_eq!(stored.metrics.val_rmse, Some(1.25));
        assert_eq!(stored.status, ModelStatus::Testing);
        assert_eq!(stored.artifact.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_production_lookup_and_promotion() {
        let registry = registry().await;
        registry.register(&metadata("baseline_arima", "1.0.0")).await.unwrap();
        registry.register(&metadata("baseline_arima", "1.0.1")).await.unwrap();

        assert!(matches!(
            registry.get_production("baseline_arima").await,
            Err(PipelineError::NotFound(_))
        ));

        registry.promote("baseline_arima", "1.0.0").await.unwrap();
        registry.promote("baseline_arima", "1.0.1").await.unwrap();

        let production = registry.get_production("baseline_arima").await.unwrap();
        assert_eq!(production.model_version, "1.0.1");
        assert_eq!(production.status, ModelStatus::Active);

        let all = registry.list(Some("baseline_arima")).await.unwrap();
        assert_eq!(all.iter().filter(|m| m.is_production).count(), 1);

        assert!(matches!(
            registry.promote("baseline_arima", "9.9.9").await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_promotions_leave_one_production_row() {
        let registry = registry().await;
        for patch in 0..6 {
            registry
                .register(&metadata("advanced_gbm", &format!("1.0.{}", patch)))
                .await
                .unwrap();
        }

        let handles: Vec<_> = (0..6)
            .map(|patch| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.promote("advanced_gbm", &format!("1.0.{}", patch)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let all = registry.list(Some("advanced_gbm")).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all.iter().filter(|m| m.is_production).count(), 1);
    }

    #[tokio::test]
    async fn test_production_version_cannot_be_archived() {
        let registry = registry().await;
        registry.register(&metadata("baseline_arima", "1.0.0")).await.unwrap();
        registry.register(&metadata("baseline_arima", "1.0.1")).await.unwrap();
        registry.promote("baseline_arima", "1.0.0").await.unwrap();

        assert!(registry
            .set_status("baseline_arima", "1.0.0", ModelStatus::Archived)
            .await
            .is_err());
        registry
            .set_status("baseline_arima", "1.0.1", ModelStatus::Archived)
            .await
            .unwrap();

        let archived = registry.get("baseline_arima", "1.0.1").await.unwrap().unwrap();
        assert_eq!(archived.status, ModelStatus::Archived);
    }

    #[tokio::test]
    async fn test_next_version_uses_semantic_order() {
        let registry = registry().await;
        assert_eq!(
            registry.suggest_next_version("baseline_arima").await.unwrap(),
            ModelVersion::initial()
        );

        registry.register(&metadata("baseline_arima", "1.0.9")).await.unwrap();
        registry.register(&metadata("baseline_arima", "1.0.10")).await.unwrap();
        assert_eq!(
            registry.suggest_next_version("baseline_arima").await.unwrap(),
            ModelVersion::new(1, 0, 11)
        );
    }
}
