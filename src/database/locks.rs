use chrono::{Duration, Utc};
use tracing::debug;

use super::Database;
use crate::error::Result;
use crate::types::time::fmt_ts;

impl Database {
    /// Takes the per-symbol advisory lock unless anyone, this owner included,
    /// holds a fresh one.
    ///
    /// A lock older than `ttl` is treated as abandoned and taken over.
    pub async fn try_acquire_symbol_lock(&self, symbol: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let stale_before = now - ttl;

        let result = sqlx::query(
            r#"
            INSERT INTO symbol_locks (symbol, owner, acquired_at)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at
            WHERE symbol_locks.acquired_at < ?
            "#,
        )
        .bind(symbol)
        .bind(owner)
        .bind(fmt_ts(now))
        .bind(fmt_ts(stale_before))
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        debug!(symbol, owner, acquired, "Symbol lock attempt");
        Ok(acquired)
    }

    pub async fn release_symbol_lock(&self, symbol: &str, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM symbol_locks WHERE symbol = ? AND owner = ?")
            .bind(symbol)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let db = Database::in_memory().await.unwrap();
        let ttl = Duration::hours(1);

        assert!(db.try_acquire_symbol_lock("X", "a", ttl).await.unwrap());
        assert!(!db.try_acquire_symbol_lock("X", "b", ttl).await.unwrap());
        assert!(db.try_acquire_symbol_lock("Y", "b", ttl).await.unwrap());

        // Wrong owner cannot release
        db.release_symbol_lock("X", "b").await.unwrap();
        assert!(!db.try_acquire_symbol_lock("X", "b", ttl).await.unwrap());

        db.release_symbol_lock("X", "a").await.unwrap();
        assert!(db.try_acquire_symbol_lock("X", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_owner_cannot_reacquire_held_lock() {
        let db = Database::in_memory().await.unwrap();
        let ttl = Duration::hours(1);

        assert!(db.try_acquire_symbol_lock("X", "a", ttl).await.unwrap());
        assert!(!db.try_acquire_symbol_lock("X", "a", ttl).await.unwrap());

        db.release_symbol_lock("X", "a").await.unwrap();
        assert!(db.try_acquire_symbol_lock("X", "a", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.try_acquire_symbol_lock("X", "a", Duration::hours(1)).await.unwrap());
        // A negative TTL makes every existing lock stale
        assert!(db.try_acquire_symbol_lock("X", "b", Duration::seconds(-5)).await.unwrap());
    }
}
