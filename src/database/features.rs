use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use super::Database;
use crate::error::{PipelineError, Result};
use crate::types::time::{fmt_ts, parse_ts};
use crate::types::{FeatureVector, Regime};

fn numeric_columns() -> String {
    FeatureVector::NUMERIC_NAMES.join(", ")
}

impl Database {
    /// Writes vectors; an existing (symbol, timestamp, feature_version) row is never touched.
    /// Returns the number of new rows.
    pub async fn insert_features(&self, vectors: &[FeatureVector]) -> Result<u64> {
        if vectors.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; FeatureVector::NUMERIC_NAMES.len()].join(", ");
        let sql = format!(
            r#"
            INSERT INTO feature_store (symbol, timestamp, feature_version, {}, regime, computed_at)
            VALUES (?, ?, ?, {}, ?, ?)
            ON CONFLICT(symbol, timestamp, feature_version) DO NOTHING
            "#,
            numeric_columns(),
            placeholders
        );

        let now = fmt_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for fv in vectors {
            let mut query = sqlx::query(&sql)
                .bind(&fv.symbol)
                .bind(fmt_ts(fv.timestamp))
                .bind(&fv.feature_version);
            for value in fv.numeric_values() {
                query = query.bind(value.filter(|v| v.is_finite()));
            }
            let result = query
                .bind(fv.regime.map(|r| r.as_str()))
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Stored vectors for one feature version with timestamp <= `until`, oldest first.
    pub async fn get_features(
        &self,
        symbol: &str,
        feature_version: &str,
        until: DateTime<Utc>,
    ) -> Result<Vec<FeatureVector>> {
        let sql = format!(
            r#"
            SELECT symbol, timestamp, feature_version, {}, regime
            FROM feature_store
            WHERE symbol = ? AND feature_version = ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
            numeric_columns()
        );

        let rows = sqlx::query(&sql)
            .bind(symbol)
            .bind(feature_version)
            .bind(fmt_ts(until))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(feature_from_row).collect()
    }

    pub async fn latest_feature_timestamp(
        &self,
        symbol: &str,
        feature_version: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT MAX(timestamp) FROM feature_store WHERE symbol = ? AND feature_version = ?",
        )
        .bind(symbol)
        .bind(feature_version)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest.as_deref().map(parse_ts).transpose()?)
    }
}

fn feature_from_row(row: &SqliteRow) -> Result<FeatureVector> {
    let mut fv = FeatureVector::empty(row.get::<String, _>("symbol"), parse_ts(row.get("timestamp"))?);
    fv.feature_version = row.get("feature_version");

    let mut values = [None; 25];
    for (slot, name) in values.iter_mut().zip(FeatureVector::NUMERIC_NAMES) {
        *slot = row.get::<Option<f64>, _>(name);
    }
    fv.set_numeric_values(values);

    fv.regime = row
        .get::<Option<String>, _>("regime")
        .map(|s| Regime::from_str(&s).map_err(PipelineError::NotFound))
        .transpose()?;

    Ok(fv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::day;
    use crate::types::FEATURE_VERSION;

    fn vector(offset: i64, sma_5: f64) -> FeatureVector {
        let mut fv = FeatureVector::empty("X", day(offset));
        fv.sma_5 = Some(sma_5);
        fv.regime = Some(Regime::Ranging);
        fv
    }

    #[tokio::test]
    async fn test_rerun_is_a_no_op() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.insert_features(&[vector(0, 1.0), vector(1, 2.0)]).await.unwrap(), 2);
        assert_eq!(db.insert_features(&[vector(1, 99.0)]).await.unwrap(), 0);

        let stored = db.get_features("X", FEATURE_VERSION, day(5)).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].sma_5, Some(2.0));
        assert_eq!(stored[1].sma_50, None);
        assert_eq!(stored[1].regime, Some(Regime::Ranging));
    }

    #[tokio::test]
    async fn test_new_version_coexists_with_old_rows() {
        let db = Database::in_memory().await.unwrap();
        db.insert_features(&[vector(0, 1.0)]).await.unwrap();

        let mut v2 = vector(0, 5.0);
        v2.feature_version = "v2".to_string();
        assert_eq!(db.insert_features(&[v2]).await.unwrap(), 1);

        let v1_rows = db.get_features("X", FEATURE_VERSION, day(0)).await.unwrap();
        assert_eq!(v1_rows[0].sma_5, Some(1.0));
        assert_eq!(db.latest_feature_timestamp("X", "v2").await.unwrap(), Some(day(0)));
    }
}
