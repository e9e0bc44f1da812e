pub mod bars;
pub mod features;
pub mod jobs;
pub mod locks;
pub mod metrics;
pub mod patterns;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::error::Result;
use crate::types::FeatureVector;

/// Shared handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database with schema
    pub async fn new(url: &str, max_connections: u32) -> Result<Self> {
        info!("Initializing SQLite database at: {}", url);

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    /// Private in-memory database on a single pinned connection.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create database schema
    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_bars (
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                adjusted_close TEXT NOT NULL,
                ingested_at TEXT NOT NULL,
                PRIMARY KEY (symbol, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let numeric_columns: String = FeatureVector::NUMERIC_NAMES
            .iter()
            .map(|name| format!("{} REAL,", name))
            .collect::<Vec<_>>()
            .join("\n                ");
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS feature_store (
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                feature_version TEXT NOT NULL,
                {}
                regime TEXT,
                computed_at TEXT NOT NULL,
                UNIQUE (symbol, timestamp, feature_version)
            )
            "#,
            numeric_columns
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                prediction_timestamp TEXT NOT NULL,
                target_timestamp TEXT NOT NULL,
                predicted_price TEXT NOT NULL,
                confidence_lower TEXT NOT NULL,
                confidence_upper TEXT NOT NULL,
                confidence_level REAL NOT NULL,
                model_name TEXT NOT NULL,
                model_version TEXT NOT NULL,
                feature_version TEXT,
                predicted_direction TEXT NOT NULL,
                direction_probability REAL NOT NULL,
                actual_price TEXT,
                prediction_error TEXT,
                direction_correct INTEGER,
                reconciled_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (symbol, target_timestamp, model_name, model_version, prediction_timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_unreconciled
            ON predictions(symbol, target_timestamp) WHERE actual_price IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_model
            ON predictions(symbol, model_name, target_timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_metadata (
                model_name TEXT NOT NULL,
                model_version TEXT NOT NULL,
                model_type TEXT NOT NULL,
                trained_at TEXT NOT NULL,
                training_data_start TEXT,
                training_data_end TEXT,
                training_samples INTEGER NOT NULL,
                feature_version TEXT,
                hyperparameters TEXT NOT NULL,
                metrics TEXT NOT NULL,
                feature_importance TEXT NOT NULL,
                status TEXT NOT NULL,
                is_production INTEGER NOT NULL DEFAULT 0,
                artifact TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (model_name, model_version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Storage-level backstop; the registry serializes promotions itself
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_model_single_production
            ON model_metadata(model_name) WHERE is_production = 1
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS detected_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                pattern_type TEXT NOT NULL,
                pattern_start TEXT NOT NULL,
                pattern_end TEXT,
                confidence REAL NOT NULL,
                signal TEXT NOT NULL,
                strength REAL NOT NULL,
                description TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                UNIQUE (symbol, pattern_type, pattern_start)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS performance_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                model_name TEXT NOT NULL,
                model_version TEXT NOT NULL,
                period_start TEXT NOT NULL,
                period_end TEXT NOT NULL,
                rmse REAL,
                mae REAL,
                mape REAL,
                directional_accuracy REAL,
                sample_size INTEGER NOT NULL,
                computed_at TEXT NOT NULL,
                UNIQUE (symbol, model_name, model_version, period_start, period_end)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_type TEXT NOT NULL,
                job_id TEXT NOT NULL,
                cycle_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_job_runs_cycle ON job_runs(cycle_id, symbol, job_type, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_job_runs_started ON job_runs(started_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS symbol_locks (
                symbol TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
