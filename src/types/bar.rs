use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One daily OHLCV record for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub adjusted_close: Decimal,
}

impl MarketBar {
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(f64::NAN)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(f64::NAN)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(f64::NAN)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }

    /// Basic OHLC sanity: positive prices, high is the top of the range.
    pub fn is_valid(&self) -> bool {
        self.close > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.high >= self.low
            && self.high >= self.close.max(self.open)
            && self.low <= self.close.min(self.open)
            && self.volume >= Decimal::ZERO
    }
}

/// Time-ordered bars for a single symbol.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    pub symbol: String,
    pub bars: Vec<MarketBar>,
}

impl BarSeries {
    /// Builds a series, sorting by timestamp and dropping duplicate timestamps.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<MarketBar>) -> Self {
        bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        bars.dedup_by(|a, b| a.timestamp == b.timestamp);
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&MarketBar> {
        self.bars.last()
    }

    pub fn last_n(&self, n: usize) -> &[MarketBar] {
        let len = self.bars.len();
        if n >= len {
            &self.bars[..]
        } else {
            &self.bars[len - n..]
        }
    }

    /// Bars with timestamp <= `t`.
    pub fn up_to(&self, t: DateTime<Utc>) -> &[MarketBar] {
        let end = self.bars.partition_point(|b| b.timestamp <= t);
        &self.bars[..end]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close_f64()).collect()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }
}
