use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, info};

use crate::database::Database;
use crate::error::{PipelineError, Result};
use crate::types::time::{fmt_ts, parse_ts, start_of_day};
use crate::types::{AccuracyReport, Direction, PerformanceSnapshot, Prediction};

/// Trailing window rolled up into `performance_metrics` after each reconciliation.
pub const SNAPSHOT_PERIOD_DAYS: i64 = 30;

const PREDICTION_COLUMNS: &str = r#"
    id, symbol, prediction_timestamp, target_timestamp, predicted_price, confidence_lower,
    confidence_upper, confidence_level, model_name, model_version, feature_version,
    predicted_direction, direction_probability, actual_price, prediction_error, direction_correct
"#;

/// Persisted forecasts and their realised outcomes.
#[derive(Clone)]
pub struct PredictionLedger {
    db: Database,
}

impl PredictionLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Bulk upsert keyed by (symbol, target, model, version, prediction time).
    ///
    /// Re-recording an unreconciled key refreshes its forecast fields; a
    /// reconciled row is left untouched. Returns rows inserted or refreshed.
    pub async fn record(&self, predictions: &[Prediction]) -> Result<u64> {
        if predictions.is_empty() {
            return Ok(0);
        }
        for p in predictions {
            p.validate()?;
        }

        let now = fmt_ts(Utc::now());
        let mut tx = self.db.pool().begin().await?;
        let mut written = 0;

        for p in predictions {
            let result = sqlx::query(
                r#"
                INSERT INTO predictions (
                    symbol, prediction_timestamp, target_timestamp, predicted_price,
                    confidence_lower, confidence_upper, confidence_level, model_name,
                    model_version, feature_version, predicted_direction, direction_probability,
                    created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, target_timestamp, model_name, model_version, prediction_timestamp)
                DO UPDATE SET
                    predicted_price = excluded.predicted_price,
                    confidence_lower = excluded.confidence_lower,
                    confidence_upper = excluded.confidence_upper,
                    confidence_level = excluded.confidence_level,
                    feature_version = excluded.feature_version,
                    predicted_direction = excluded.predicted_direction,
                    direction_probability = excluded.direction_probability
                WHERE predictions.actual_price IS NULL
                "#,
            )
            .bind(&p.symbol)
            .bind(fmt_ts(p.prediction_timestamp))
            .bind(fmt_ts(p.target_timestamp))
            .bind(p.predicted_price.to_string())
            .bind(p.confidence_lower.to_string())
            .bind(p.confidence_upper.to_string())
            .bind(p.confidence_level)
            .bind(&p.model_name)
            .bind(&p.model_version)
            .bind(&p.feature_version)
            .bind(p.predicted_direction.as_str())
            .bind(p.direction_probability)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        debug!(count = predictions.len(), written, "Recorded predictions");
        Ok(written)
    }

    /// Backfills outcomes for due, unfilled predictions whose target bar exists
    /// at or before `as_of`.
    ///
    /// Each row transitions unfilled to filled at most once; rows already filled
    /// are never selected or updated. Returns the number of rows filled.
    pub async fn reconcile(&self, symbol: &str, as_of: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_timestamp, predicted_price, predicted_direction, model_name, model_version
            FROM predictions
            WHERE symbol = ? AND target_timestamp <= ? AND actual_price IS NULL
            ORDER BY target_timestamp
            "#,
        )
        .bind(symbol)
        .bind(fmt_ts(as_of))
        .fetch_all(self.db.pool())
        .await?;

        let now = fmt_ts(Utc::now());
        let mut updated = 0;
        let mut touched = BTreeSet::new();

        for row in rows {
            let id: i64 = row.get("id");
            let target = parse_ts(row.get("target_timestamp"))?;
            let predicted = Decimal::from_str(row.get("predicted_price"))?;
            let direction = Direction::from_str(row.get("predicted_direction")).map_err(PipelineError::NotFound)?;

            let Some(bar) = self.db.bar_on_date(symbol, target.date_naive(), as_of).await? else {
                debug!(symbol, target = %target, "Target bar not yet available");
                continue;
            };
            let actual = bar.close;
            let prior_close = self.db.close_before(symbol, start_of_day(target)).await?;
            let direction_correct = prior_close.and_then(|prior| direction.is_correct(actual, prior));

            let result = sqlx::query(
                r#"
                UPDATE predictions
                SET actual_price = ?, prediction_error = ?, direction_correct = ?, reconciled_at = ?
                WHERE id = ? AND actual_price IS NULL
                "#,
            )
            .bind(actual.to_string())
            .bind((actual - predicted).to_string())
            .bind(direction_correct)
            .bind(&now)
            .bind(id)
            .execute(self.db.pool())
            .await?;

            if result.rows_affected() > 0 {
                updated += result.rows_affected();
                touched.insert((row.get::<String, _>("model_name"), row.get::<String, _>("model_version")));
            }
        }

        for (model_name, model_version) in &touched {
            self.snapshot(symbol, model_name, model_version, SNAPSHOT_PERIOD_DAYS, as_of)
                .await?;
        }

        if updated > 0 {
            info!(symbol, updated, "Reconciled predictions");
        }
        Ok(updated)
    }

    /// Accuracy over reconciled predictions with targets in the last `period_days`.
    pub async fn accuracy(&self, symbol: &str, model_name: &str, period_days: i64) -> Result<AccuracyReport> {
        self.accuracy_as_of(symbol, model_name, period_days, Utc::now()).await
    }

    pub async fn accuracy_as_of(
        &self,
        symbol: &str,
        model_name: &str,
        period_days: i64,
        as_of: DateTime<Utc>,
    ) -> Result<AccuracyReport> {
        let start = as_of - Duration::days(period_days.max(0));
        self.aggregate(symbol, model_name, None, start, as_of).await
    }

    /// Rolls up one model version's accuracy into `performance_metrics`.
    pub async fn snapshot(
        &self,
        symbol: &str,
        model_name: &str,
        model_version: &str,
        period_days: i64,
        as_of: DateTime<Utc>,
    ) -> Result<PerformanceSnapshot> {
        let period_end = start_of_day(as_of);
        let period_start = period_end - Duration::days(period_days.max(0));
        let report = self
            .aggregate(symbol, model_name, Some(model_version), period_start, as_of)
            .await?;

        let snapshot = PerformanceSnapshot {
            symbol: symbol.to_string(),
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            period_start,
            period_end,
            rmse: report.rmse,
            mae: report.mae,
            mape: report.mape,
            directional_accuracy: report.directional_accuracy,
            sample_size: report.sample_size,
            computed_at: Utc::now(),
        };
        self.db.upsert_performance(&snapshot).await?;
        Ok(snapshot)
    }

    /// Stored predictions for a symbol, newest target first.
    pub async fn predictions(&self, symbol: &str, model_name: Option<&str>, limit: u32) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM predictions
            WHERE symbol = ? AND (? IS NULL OR model_name = ?)
            ORDER BY target_timestamp DESC, id DESC
            LIMIT ?
            "#,
            PREDICTION_COLUMNS
        ))
        .bind(symbol)
        .bind(model_name)
        .bind(model_name)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(prediction_from_row).collect()
    }

    async fn aggregate(
        &self,
        symbol: &str,
        model_name: &str,
        model_version: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AccuracyReport> {
        let rows = sqlx::query(
            r#"
            SELECT predicted_price, actual_price, direction_correct
            FROM predictions
            WHERE symbol = ? AND model_name = ? AND (? IS NULL OR model_version = ?)
              AND actual_price IS NOT NULL
              AND target_timestamp > ? AND target_timestamp <= ?
            "#,
        )
        .bind(symbol)
        .bind(model_name)
        .bind(model_version)
        .bind(model_version)
        .bind(fmt_ts(start))
        .bind(fmt_ts(end))
        .fetch_all(self.db.pool())
        .await?;

        let mut report = AccuracyReport::empty(symbol, model_name, start, end);
        if rows.is_empty() {
            return Ok(report);
        }

        let mut sq_sum = 0.0;
        let mut abs_sum = 0.0;
        let mut pct_sum = 0.0;
        let mut pct_count = 0usize;
        let mut correct = 0usize;
        let mut scored = 0usize;

        for row in &rows {
            let predicted = Decimal::from_str(row.get("predicted_price"))?;
            let actual = Decimal::from_str(row.get("actual_price"))?;
            let error = (actual - predicted).to_f64().unwrap_or(f64::NAN);
            sq_sum += error * error;
            abs_sum += error.abs();
            if !actual.is_zero() {
                pct_sum += ((actual - predicted) / actual).abs().to_f64().unwrap_or(0.0);
                pct_count += 1;
            }
            if let Some(hit) = row.get::<Option<bool>, _>("direction_correct") {
                scored += 1;
                if hit {
                    correct += 1;
                }
            }
        }

        let n = rows.len() as f64;
        report.sample_size = rows.len();
        report.rmse = Some((sq_sum / n).sqrt());
        report.mae = Some(abs_sum / n);
        report.mape = (pct_count > 0).then(|| pct_sum / pct_count as f64 * 100.0);
        report.directional_sample_size = scored;
        report.directional_accuracy = (scored > 0).then(|| correct as f64 / scored as f64);
        Ok(report)
    }
}

fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
    let decimal = |column: &str| -> Result<Option<Decimal>> {
        row.get::<Option<String>, _>(column)
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(PipelineError::from)
    };

    Ok(Prediction {
        symbol: row.get("symbol"),
        prediction_timestamp: parse_ts(row.get("prediction_timestamp"))?,
        target_timestamp: parse_ts(row.get("target_timestamp"))?,
        predicted_price: Decimal::from_str(row.get("predicted_price"))?,
        confidence_lower: Decimal::from_str(row.get("confidence_lower"))?,
        confidence_upper: Decimal::from_str(row.get("confidence_upper"))?,
        confidence_level: row.get("confidence_level"),
        model_name: row.get("model_name"),
        model_version: row.get("model_version"),
        feature_version: row.get("feature_version"),
        predicted_direction: Direction::from_str(row.get("predicted_direction")).map_err(PipelineError::NotFound)?,
        direction_probability: row.get("direction_probability"),
        actual_price: decimal("actual_price")?,
        prediction_error: decimal("prediction_error")?,
        direction_correct: row.get("direction_correct"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::{bar, day};
    use crate::types::prediction::test_support::prediction;
    use rust_decimal_macros::dec;

    async fn ledger() -> (Database, PredictionLedger) {
        let db = Database::in_memory().await.unwrap();
        (db.clone(), PredictionLedger::new(db))
    }

    #[tokio::test]
    async fn test_reconcile_fills_outcome_once() {
        let (db, ledger) = ledger().await;
        let predicted_at = day(9) + Duration::hours(21);
        let p = prediction("X", predicted_at, day(10), dec!(100), Direction::Up);
        assert_eq!(ledger.record(&[p]).await.unwrap(), 1);

        db.insert_bars(&[bar("X", 9, 98.0), bar("X", 10, 105.0)]).await.unwrap();

        let as_of = day(10) + Duration::hours(21);
        assert_eq!(ledger.reconcile("X", as_of).await.unwrap(), 1);

        let stored = ledger.predictions("X", None, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].actual_price, Some(dec!(105)));
        assert_eq!(stored[0].prediction_error, Some(dec!(5.00)));
        assert_eq!(stored[0].direction_correct, Some(true));

        // Second pass is a no-op and leaves the row unchanged
        assert_eq!(ledger.reconcile("X", as_of).await.unwrap(), 0);
        assert_eq!(ledger.predictions("X", None, 10).await.unwrap(), stored);

        // Re-recording a filled key does not reopen it
        let again = prediction("X", predicted_at, day(10), dec!(101), Direction::Up);
        assert_eq!(ledger.record(&[again]).await.unwrap(), 0);
        assert_eq!(ledger.predictions("X", None, 10).await.unwrap(), stored);

        let snapshots = db.get_performance("X", "baseline_arima", 5).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].sample_size, 1);
    }

    #[tokio::test]
    async fn test_missing_target_bar_waits() {
        let (db, ledger) = ledger().await;
        let p = prediction("X", day(3) + Duration::hours(21), day(4), dec!(100), Direction::Down);
        ledger.record(&[p]).await.unwrap();
        db.insert_bars(&[bar("X", 3, 101.0)]).await.unwrap();

        assert_eq!(ledger.reconcile("X", day(5)).await.unwrap(), 0);
        db.insert_bars(&[bar("X", 4, 99.0)]).await.unwrap();
        assert_eq!(ledger.reconcile("X", day(5)).await.unwrap(), 1);

        let stored = ledger.predictions("X", None, 1).await.unwrap();
        assert_eq!(stored[0].direction_correct, Some(true));
        assert_eq!(stored[0].prediction_error, Some(dec!(-1)));
    }

    #[tokio::test]
    async fn test_future_targets_are_not_reconciled() {
        let (db, ledger) = ledger().await;
        let p = prediction("X", day(3) + Duration::hours(21), day(6), dec!(100), Direction::Up);
        ledger.record(&[p]).await.unwrap();
        db.insert_bars(&[bar("X", 5, 98.0), bar("X", 6, 105.0)]).await.unwrap();

        assert_eq!(ledger.reconcile("X", day(5) + Duration::hours(21)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_target_bar_stamped_after_as_of_is_not_used() {
        let (db, ledger) = ledger().await;
        let p = prediction("X", day(9) + Duration::hours(21), day(10), dec!(100), Direction::Up);
        ledger.record(&[p]).await.unwrap();

        let mut late = bar("X", 10, 105.0);
        late.timestamp = day(10) + Duration::hours(16);
        db.insert_bars(&[bar("X", 9, 98.0), late]).await.unwrap();

        // Target is due but its bar lands later that day
        assert_eq!(ledger.reconcile("X", day(10) + Duration::hours(12)).await.unwrap(), 0);
        assert_eq!(ledger.predictions("X", None, 1).await.unwrap()[0].actual_price, None);

        assert_eq!(ledger.reconcile("X", day(10) + Duration::hours(21)).await.unwrap(), 1);
        assert_eq!(ledger.predictions("X", None, 1).await.unwrap()[0].actual_price, Some(dec!(105)));
    }

    #[tokio::test]
    async fn test_accuracy_with_no_data_is_empty() {
        let (_, ledger) = ledger().await;
        let report = ledger.accuracy("X", "baseline_arima", 30).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.rmse, None);
        assert_eq!(report.directional_accuracy, None);
    }

    #[tokio::test]
    async fn test_accuracy_excludes_neutral_calls() {
        let (db, ledger) = ledger().await;
        ledger
            .record(&[
                prediction("X", day(1) + Duration::hours(21), day(2), dec!(100), Direction::Up),
                prediction("X", day(2) + Duration::hours(21), day(3), dec!(104), Direction::Neutral),
                prediction("X", day(3) + Duration::hours(21), day(4), dec!(100), Direction::Up),
            ])
            .await
            .unwrap();
        db.insert_bars(&[
            bar("X", 1, 100.0),
            bar("X", 2, 102.0),
            bar("X", 3, 102.0),
            bar("X", 4, 98.0),
        ])
        .await
        .unwrap();
        assert_eq!(ledger.reconcile("X", day(4) + Duration::hours(21)).await.unwrap(), 3);

        let report = ledger
            .accuracy_as_of("X", "baseline_arima", 30, day(5))
            .await
            .unwrap();
        assert_eq!(report.sample_size, 3);
        assert_eq!(report.directional_sample_size, 2);
        assert!((report.directional_accuracy.unwrap() - 0.5).abs() < 1e-12);
        // errors: +2, -2, -2
        assert!((report.mae.unwrap() - 2.0).abs() < 1e-12);
        assert!((report.rmse.unwrap() - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_invalid_prediction_is_rejected() {
        let (_, ledger) = ledger().await;
        let p = prediction("X", day(4), day(4), dec!(100), Direction::Up);
        assert!(matches!(
            ledger.record(&[p]).await,
            Err(PipelineError::InvalidPrediction(_))
        ));
    }
}
