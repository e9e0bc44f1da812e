pub mod csv_provider;

pub use csv_provider::CsvQuoteProvider;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::Result;
use crate::types::MarketBar;

/// Source of daily OHLCV bars.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bars for `symbol` dated within `[start, end]`, in any order.
    async fn fetch_daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<MarketBar>>;
}

/// Fixed bars held in memory, keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuoteProvider {
    bars: HashMap<String, Vec<MarketBar>>,
}

impl MemoryQuoteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, bars: Vec<MarketBar>) -> Self {
        for bar in bars {
            self.bars.entry(bar.symbol.clone()).or_default().push(bar);
        }
        self
    }
}

#[async_trait]
impl QuoteProvider for MemoryQuoteProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<MarketBar>> {
        Ok(self
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| {
                        let date = b.timestamp.date_naive();
                        date >= start && date <= end
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub fetched: usize,
    pub rejected: usize,
    pub inserted: u64,
}

/// Fetches and stores bars; malformed bars are dropped, duplicates are ignored.
pub async fn ingest_symbol(
    db: &Database,
    provider: &dyn QuoteProvider,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<IngestSummary> {
    let fetched = provider.fetch_daily_bars(symbol, start, end).await?;
    let total = fetched.len();

    let (valid, invalid): (Vec<MarketBar>, Vec<MarketBar>) = fetched
        .into_iter()
        .partition(|b| b.symbol == symbol && b.is_valid());
    if !invalid.is_empty() {
        warn!(
            symbol,
            provider = provider.name(),
            rejected = invalid.len(),
            "Dropped malformed bars"
        );
    }

    let inserted = db.insert_bars(&valid).await?;
    debug!(symbol, fetched = total, inserted, "Ingested bars");

    Ok(IngestSummary {
        fetched: total,
        rejected: invalid.len(),
        inserted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::types::bar::test_support::{bar, day, rising_bars};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_duplicates_and_malformed_bars() {
        let db = Database::in_memory().await.unwrap();
        let mut broken = bar("X", 3, 100.0);
        broken.low = broken.high + Decimal::ONE;
        let provider = MemoryQuoteProvider::new().with_bars(rising_bars("X", 3, 100.0, 102.0)).with_bars(vec![broken]);

        let start = day(0).date_naive();
        let end = day(10).date_naive();
        let first = ingest_symbol(&db, &provider, "X", start, end).await.unwrap();
        assert_eq!(
            first,
            IngestSummary {
                fetched: 4,
                rejected: 1,
                inserted: 3
            }
        );

        let again = ingest_symbol(&db, &provider, "X", start, end).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(db.bar_count("X").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let db = Database::in_memory().await.unwrap();
        let mut provider = MockQuoteProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_fetch_daily_bars()
            .returning(|_, _, _| Err(PipelineError::Ingestion("connection reset".to_string())));

        let err = ingest_symbol(&db, &provider, "X", day(0).date_naive(), day(1).date_naive())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
