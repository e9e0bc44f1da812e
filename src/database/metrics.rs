use chrono::Utc;
use sqlx::Row;

use super::Database;
use crate::error::Result;
use crate::types::time::{fmt_ts, parse_ts};
use crate::types::PerformanceSnapshot;

impl Database {
    /// Upserts the rolled-up accuracy for one (symbol, model, version, period).
    pub async fn upsert_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO performance_metrics (
                symbol, model_name, model_version, period_start, period_end,
                rmse, mae, mape, directional_accuracy, sample_size, computed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, model_name, model_version, period_start, period_end) DO UPDATE SET
                rmse = excluded.rmse,
                mae = excluded.mae,
                mape = excluded.mape,
                directional_accuracy = excluded.directional_accuracy,
                sample_size = excluded.sample_size,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&snapshot.symbol)
        .bind(&snapshot.model_name)
        .bind(&snapshot.model_version)
        .bind(fmt_ts(snapshot.period_start))
        .bind(fmt_ts(snapshot.period_end))
        .bind(snapshot.rmse)
        .bind(snapshot.mae)
        .bind(snapshot.mape)
        .bind(snapshot.directional_accuracy)
        .bind(snapshot.sample_size as i64)
        .bind(fmt_ts(snapshot.computed_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent snapshots for a symbol/model, newest period first.
    pub async fn get_performance(
        &self,
        symbol: &str,
        model_name: &str,
        limit: u32,
    ) -> Result<Vec<PerformanceSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, model_name, model_version, period_start, period_end,
                   rmse, mae, mape, directional_accuracy, sample_size, computed_at
            FROM performance_metrics
            WHERE symbol = ? AND model_name = ?
            ORDER BY period_end DESC, computed_at DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(model_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(PerformanceSnapshot {
                symbol: row.get("symbol"),
                model_name: row.get("model_name"),
                model_version: row.get("model_version"),
                period_start: parse_ts(row.get("period_start"))?,
                period_end: parse_ts(row.get("period_end"))?,
                rmse: row.get("rmse"),
                mae: row.get("mae"),
                mape: row.get("mape"),
                directional_accuracy: row.get("directional_accuracy"),
                sample_size: row.get::<i64, _>("sample_size").max(0) as usize,
                computed_at: parse_ts(row.get("computed_at"))?,
            });
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::day;

    fn snapshot(rmse: f64, sample_size: usize) -> PerformanceSnapshot {
        PerformanceSnapshot {
            symbol: "X".to_string(),
            model_name: "baseline_arima".to_string(),
            model_version: "1.0.0".to_string(),
            period_start: day(0),
            period_end: day(30),
            rmse: Some(rmse),
            mae: Some(rmse / 2.0),
            mape: Some(1.5),
            directional_accuracy: None,
            sample_size,
            computed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_same_period_is_updated_in_place() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_performance(&snapshot(2.0, 4)).await.unwrap();
        db.upsert_performance(&snapshot(1.0, 6)).await.unwrap();

        let stored = db.get_performance("X", "baseline_arima", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].rmse, Some(1.0));
        assert_eq!(stored[0].sample_size, 6);
        assert_eq!(stored[0].directional_accuracy, None);
    }
}
