use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::QuoteProvider;
use crate::error::{PipelineError, Result};
use crate::types::time::date_at_midnight;
use crate::types::MarketBar;

#[derive(Debug, Deserialize)]
struct DailyRecord {
    date: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    #[serde(default)]
    adjusted_close: Option<Decimal>,
}

/// Reads `<dir>/<SYMBOL>.csv` files with a `date,open,high,low,close,volume[,adjusted_close]` header.
#[derive(Debug, Clone)]
pub struct CsvQuoteProvider {
    dir: PathBuf,
}

impl CsvQuoteProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }
}

#[async_trait]
impl QuoteProvider for CsvQuoteProvider {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn fetch_daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<MarketBar>> {
        let path = self.path_for(symbol);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::NotFound(format!("quote file {}", path.display())))
            }
            Err(e) => return Err(PipelineError::Ingestion(format!("{}: {}", path.display(), e))),
        };

        let bars = parse_daily_csv(symbol, &content, &path)?;
        Ok(bars
            .into_iter()
            .filter(|b| {
                let date = b.timestamp.date_naive();
                date >= start && date <= end
            })
            .collect())
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date_at_midnight(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| date_at_midnight(t.with_timezone(&Utc).date_naive()))
}

fn parse_daily_csv(symbol: &str, content: &str, path: &Path) -> Result<Vec<MarketBar>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut bars = Vec::new();
    for (line, record) in reader.deserialize::<DailyRecord>().enumerate() {
        let record = record.map_err(|e| PipelineError::MalformedData(format!("{} row {}: {}", path.display(), line + 2, e)))?;
        let timestamp = parse_date(&record.date).ok_or_else(|| {
            PipelineError::MalformedData(format!("{} row {}: bad date {:?}", path.display(), line + 2, record.date))
        })?;
        bars.push(MarketBar {
            symbol: symbol.to_string(),
            timestamp,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
            adjusted_close: record.adjusted_close.unwrap_or(record.close),
        });
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("quotes-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parses_rows_with_and_without_adjusted_close() {
        let content = "date,open,high,low,close,volume,adjusted_close\n\
                       2024-01-02,100,105,99,104,1500,103.5\n\
                       2024-01-03,104,106,101,102,1200,\n";
        let bars = parse_daily_csv("X", content, Path::new("X.csv")).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].adjusted_close, dec!(103.5));
        assert_eq!(bars[1].adjusted_close, dec!(102));
        assert_eq!(bars[1].timestamp.date_naive().to_string(), "2024-01-03");
    }

    #[test]
    fn test_bad_date_is_reported() {
        let content = "date,open,high,low,close,volume\nyesterday,1,1,1,1,1\n";
        assert!(parse_daily_csv("X", content, Path::new("X.csv")).is_err());
    }

    #[tokio::test]
    async fn test_reads_symbol_file_within_range() {
        let dir = temp_dir();
        std::fs::write(
            dir.join("X.csv"),
            "date,open,high,low,close,volume\n\
             2024-01-02,100,105,99,104,1500\n\
             2024-01-03,104,106,101,102,1200\n\
             2024-01-04,102,103,100,101,1100\n",
        )
        .unwrap();

        let provider = CsvQuoteProvider::new(&dir);
        let start = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        let bars = provider.fetch_daily_bars("X", start, end).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars.iter().all(|b| b.is_valid()));

        let missing = provider.fetch_daily_bars("Y", start, end).await.unwrap_err();
        assert!(matches!(missing, PipelineError::NotFound(_)));
        assert!(!missing.is_transient());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
