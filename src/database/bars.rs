use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::Database;
use crate::error::Result;
use crate::types::time::{date_at_midnight, fmt_ts, parse_ts};
use crate::types::{BarSeries, MarketBar};

impl Database {
    /// Appends bars; rows already present for (symbol, timestamp) are left untouched.
    /// Returns the number of new rows.
    pub async fn insert_bars(&self, bars: &[MarketBar]) -> Result<u64> {
        if bars.is_empty() {
            return Ok(0);
        }

        let now = fmt_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for bar in bars {
            let result = sqlx::query(
                r#"
                INSERT INTO market_bars (
                    symbol, timestamp, open, high, low, close, volume, adjusted_close, ingested_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, timestamp) DO NOTHING
                "#,
            )
            .bind(&bar.symbol)
            .bind(fmt_ts(bar.timestamp))
            .bind(bar.open.to_string())
            .bind(bar.high.to_string())
            .bind(bar.low.to_string())
            .bind(bar.close.to_string())
            .bind(bar.volume.to_string())
            .bind(bar.adjusted_close.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!("Inserted {} of {} bars", inserted, bars.len());
        Ok(inserted)
    }

    /// Bars for `symbol` with `since <= timestamp <= until`, oldest first.
    pub async fn get_bars(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<BarSeries> {
        let since = since.map(fmt_ts).unwrap_or_default();
        let rows = sqlx::query(
            r#"
            SELECT symbol, timestamp, open, high, low, close, volume, adjusted_close
            FROM market_bars
            WHERE symbol = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(symbol)
        .bind(since)
        .bind(fmt_ts(until))
        .fetch_all(&self.pool)
        .await?;

        let bars = rows.iter().map(bar_from_row).collect::<Result<Vec<_>>>()?;
        Ok(BarSeries::new(symbol, bars))
    }

    pub async fn latest_bar_timestamp(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(timestamp) FROM market_bars WHERE symbol = ?")
                .bind(symbol)
                .fetch_one(&self.pool)
                .await?;

        Ok(latest.as_deref().map(parse_ts).transpose()?)
    }

    /// First bar on the given UTC calendar date already stamped at `visible_at`.
    pub async fn bar_on_date(
        &self,
        symbol: &str,
        date: NaiveDate,
        visible_at: DateTime<Utc>,
    ) -> Result<Option<MarketBar>> {
        let start = date_at_midnight(date);
        let end = start + Duration::days(1);

        let row = sqlx::query(
            r#"
            SELECT symbol, timestamp, open, high, low, close, volume, adjusted_close
            FROM market_bars
            WHERE symbol = ? AND timestamp >= ? AND timestamp < ? AND timestamp <= ?
            ORDER BY timestamp ASC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(fmt_ts(start))
        .bind(fmt_ts(end))
        .bind(fmt_ts(visible_at))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(bar_from_row).transpose()
    }

    /// Close of the last bar strictly before `before`.
    pub async fn close_before(&self, symbol: &str, before: DateTime<Utc>) -> Result<Option<Decimal>> {
        let close: Option<String> = sqlx::query_scalar(
            r#"
            SELECT close FROM market_bars
            WHERE symbol = ? AND timestamp < ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(fmt_ts(before))
        .fetch_optional(&self.pool)
        .await?;

        Ok(close.as_deref().map(Decimal::from_str).transpose()?)
    }

    pub async fn bar_count(&self, symbol: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM market_bars WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Retention: drops bars older than `cutoff`.
    pub async fn prune_bars(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM market_bars WHERE timestamp < ?")
            .bind(fmt_ts(cutoff))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            info!("Pruned {} bars older than {}", result.rows_affected(), cutoff);
        }
        Ok(result.rows_affected())
    }
}

fn bar_from_row(row: &SqliteRow) -> Result<MarketBar> {
    Ok(MarketBar {
        symbol: row.get("symbol"),
        timestamp: parse_ts(row.get("timestamp"))?,
        open: Decimal::from_str(row.get("open"))?,
        high: Decimal::from_str(row.get("high"))?,
        low: Decimal::from_str(row.get("low"))?,
        close: Decimal::from_str(row.get("close"))?,
        volume: Decimal::from_str(row.get("volume"))?,
        adjusted_close: Decimal::from_str(row.get("adjusted_close"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::{bar, day};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_duplicate_bars_are_ignored() {
        let db = Database::in_memory().await.unwrap();
        let bars = vec![bar("X", 0, 100.0), bar("X", 1, 101.0)];

        assert_eq!(db.insert_bars(&bars).await.unwrap(), 2);

        // Same keys with different prices: silently ignored, original kept
        let replay = vec![bar("X", 1, 999.0), bar("X", 2, 102.0)];
        assert_eq!(db.insert_bars(&replay).await.unwrap(), 1);

        let series = db.get_bars("X", None, day(10)).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.bars[1].close, dec!(101));
    }

    #[tokio::test]
    async fn test_lookups_by_date_and_prior_close() {
        let db = Database::in_memory().await.unwrap();
        db.insert_bars(&[bar("X", 0, 98.0), bar("X", 1, 105.0), bar("Y", 1, 7.0)])
            .await
            .unwrap();

        let on_day = db.bar_on_date("X", day(1).date_naive(), day(3)).await.unwrap().unwrap();
        assert_eq!(on_day.close, dec!(105));
        assert!(db.bar_on_date("X", day(2).date_naive(), day(3)).await.unwrap().is_none());
        // Not yet visible before its own timestamp
        assert!(db
            .bar_on_date("X", day(1).date_naive(), day(1) - Duration::seconds(1))
            .await
            .unwrap()
            .is_none());

        assert_eq!(db.close_before("X", day(1)).await.unwrap(), Some(dec!(98)));
        assert_eq!(db.close_before("X", day(0)).await.unwrap(), None);
        assert_eq!(db.latest_bar_timestamp("X").await.unwrap(), Some(day(1)));
        assert_eq!(db.latest_bar_timestamp("Z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_bars_respects_window() {
        let db = Database::in_memory().await.unwrap();
        let bars: Vec<_> = (0..10).map(|i| bar("X", i, 100.0 + i as f64)).collect();
        db.insert_bars(&bars).await.unwrap();

        let window = db.get_bars("X", Some(day(3)), day(6)).await.unwrap();
        assert_eq!(window.len(), 4);
        assert_eq!(window.bars[0].timestamp, day(3));

        assert_eq!(db.prune_bars(day(5)).await.unwrap(), 5);
        assert_eq!(db.bar_count("X").await.unwrap(), 5);
    }
}
