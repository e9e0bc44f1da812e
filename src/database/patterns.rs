use chrono::Utc;
use sqlx::Row;

use super::Database;
use crate::error::{PipelineError, Result};
use crate::types::time::{fmt_ts, parse_ts};
use crate::types::{DetectedPattern, PatternSignal};

impl Database {
    /// Stores detected patterns; a pattern already recorded at the same start is skipped.
    pub async fn insert_patterns(&self, patterns: &[DetectedPattern]) -> Result<u64> {
        if patterns.is_empty() {
            return Ok(0);
        }

        let now = fmt_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for p in patterns {
            let result = sqlx::query(
                r#"
                INSERT INTO detected_patterns (
                    symbol, pattern_type, pattern_start, pattern_end, confidence,
                    signal, strength, description, detected_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, pattern_type, pattern_start) DO NOTHING
                "#,
            )
            .bind(&p.symbol)
            .bind(&p.pattern_type)
            .bind(fmt_ts(p.pattern_start))
            .bind(p.pattern_end.map(fmt_ts))
            .bind(p.confidence)
            .bind(p.signal.as_str())
            .bind(p.strength)
            .bind(&p.description)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn recent_patterns(&self, symbol: &str, limit: u32) -> Result<Vec<DetectedPattern>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, pattern_type, pattern_start, pattern_end, confidence, signal, strength, description
            FROM detected_patterns
            WHERE symbol = ?
            ORDER BY pattern_start DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut patterns = Vec::with_capacity(rows.len());
        for row in rows {
            let signal = match row.get::<&str, _>("signal") {
                "bullish" => PatternSignal::Bullish,
                "bearish" => PatternSignal::Bearish,
                other => return Err(PipelineError::NotFound(format!("Unknown pattern signal: {}", other))),
            };
            patterns.push(DetectedPattern {
                symbol: row.get("symbol"),
                pattern_type: row.get("pattern_type"),
                pattern_start: parse_ts(row.get("pattern_start"))?,
                pattern_end: row
                    .get::<Option<String>, _>("pattern_end")
                    .as_deref()
                    .map(parse_ts)
                    .transpose()?,
                confidence: row.get("confidence"),
                signal,
                strength: row.get("strength"),
                description: row.get("description"),
            });
        }
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::day;

    #[tokio::test]
    async fn test_patterns_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let p = DetectedPattern {
            symbol: "X".to_string(),
            pattern_type: "golden_cross".to_string(),
            pattern_start: day(3),
            pattern_end: Some(day(3)),
            confidence: 0.7,
            signal: PatternSignal::Bullish,
            strength: 0.4,
            description: "SMA20 crossed above SMA50".to_string(),
        };

        assert_eq!(db.insert_patterns(&[p.clone()]).await.unwrap(), 1);
        assert_eq!(db.insert_patterns(&[p.clone()]).await.unwrap(), 0);

        let stored = db.recent_patterns("X", 5).await.unwrap();
        assert_eq!(stored, vec![p]);
    }
}
