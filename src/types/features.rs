use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current feature schema tag. Bump when definitions change; older rows stay readable.
pub const FEATURE_VERSION: &str = "v1";

/// Coarse market-behaviour classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    HighVolatility,
}

impl Regime {
    pub const ALL: [Regime; 4] = [
        Regime::HighVolatility,
        Regime::Ranging,
        Regime::TrendingDown,
        Regime::TrendingUp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::TrendingUp => "trending_up",
            Regime::TrendingDown => "trending_down",
            Regime::Ranging => "ranging",
            Regime::HighVolatility => "high_volatility",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trending_up" => Ok(Regime::TrendingUp),
            "trending_down" => Ok(Regime::TrendingDown),
            "ranging" => Ok(Regime::Ranging),
            "high_volatility" => Ok(Regime::HighVolatility),
            _ => Err(format!("Unknown regime: {}", s)),
        }
    }
}

/// Versioned feature vector for one (symbol, timestamp).
///
/// Every numeric field is `None` until enough history exists to compute it;
/// absence means "not yet computable", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub feature_version: String,

    // Technical
    pub sma_5: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub atr_14: Option<f64>,
    pub obv: Option<f64>,

    // Price / volume statistics
    pub returns_1d: Option<f64>,
    pub returns_5d: Option<f64>,
    pub returns_20d: Option<f64>,
    pub volatility_20d: Option<f64>,
    pub volume_sma_20: Option<f64>,
    pub volume_ratio: Option<f64>,

    // Sector / peer correlation
    pub correlation_sector: Option<f64>,
    pub correlation_peers: Option<f64>,
    pub relative_strength_sector: Option<f64>,
    pub relative_strength_peers: Option<f64>,

    // Regime
    pub regime: Option<Regime>,
    pub trend_strength: Option<f64>,
}

impl FeatureVector {
    pub fn empty(symbol: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            feature_version: FEATURE_VERSION.to_string(),
            sma_5: None,
            sma_20: None,
            sma_50: None,
            ema_12: None,
            ema_26: None,
            rsi_14: None,
            macd: None,
            macd_signal: None,
            macd_histogram: None,
            bollinger_upper: None,
            bollinger_middle: None,
            bollinger_lower: None,
            atr_14: None,
            obv: None,
            returns_1d: None,
            returns_5d: None,
            returns_20d: None,
            volatility_20d: None,
            volume_sma_20: None,
            volume_ratio: None,
            correlation_sector: None,
            correlation_peers: None,
            relative_strength_sector: None,
            relative_strength_peers: None,
            regime: None,
            trend_strength: None,
        }
    }

    /// Numeric columns in storage / model-input order.
    pub const NUMERIC_NAMES: [&'static str; 25] = [
        "sma_5",
        "sma_20",
        "sma_50",
        "ema_12",
        "ema_26",
        "rsi_14",
        "macd",
        "macd_signal",
        "macd_histogram",
        "bollinger_upper",
        "bollinger_middle",
        "bollinger_lower",
        "atr_14",
        "obv",
        "returns_1d",
        "returns_5d",
        "returns_20d",
        "volatility_20d",
        "volume_sma_20",
        "volume_ratio",
        "correlation_sector",
        "correlation_peers",
        "relative_strength_sector",
        "relative_strength_peers",
        "trend_strength",
    ];

    pub fn numeric_values(&self) -> [Option<f64>; 25] {
        [
            self.sma_5,
            self.sma_20,
            self.sma_50,
            self.ema_12,
            self.ema_26,
            self.rsi_14,
            self.macd,
            self.macd_signal,
            self.macd_histogram,
            self.bollinger_upper,
            self.bollinger_middle,
            self.bollinger_lower,
            self.atr_14,
            self.obv,
            self.returns_1d,
            self.returns_5d,
            self.returns_20d,
            self.volatility_20d,
            self.volume_sma_20,
            self.volume_ratio,
            self.correlation_sector,
            self.correlation_peers,
            self.relative_strength_sector,
            self.relative_strength_peers,
            self.trend_strength,
        ]
    }

    /// Inverse of [`numeric_values`](Self::numeric_values).
    pub fn set_numeric_values(&mut self, values: [Option<f64>; 25]) {
        let [sma_5, sma_20, sma_50, ema_12, ema_26, rsi_14, macd, macd_signal, macd_histogram, bollinger_upper, bollinger_middle, bollinger_lower, atr_14, obv, returns_1d, returns_5d, returns_20d, volatility_20d, volume_sma_20, volume_ratio, correlation_sector, correlation_peers, relative_strength_sector, relative_strength_peers, trend_strength] =
            values;
        self.sma_5 = sma_5;
        self.sma_20 = sma_20;
        self.sma_50 = sma_50;
        self.ema_12 = ema_12;
        self.ema_26 = ema_26;
        self.rsi_14 = rsi_14;
        self.macd = macd;
        self.macd_signal = macd_signal;
        self.macd_histogram = macd_histogram;
        self.bollinger_upper = bollinger_upper;
        self.bollinger_middle = bollinger_middle;
        self.bollinger_lower = bollinger_lower;
        self.atr_14 = atr_14;
        self.obv = obv;
        self.returns_1d = returns_1d;
        self.returns_5d = returns_5d;
        self.returns_20d = returns_20d;
        self.volatility_20d = volatility_20d;
        self.volume_sma_20 = volume_sma_20;
        self.volume_ratio = volume_ratio;
        self.correlation_sector = correlation_sector;
        self.correlation_peers = correlation_peers;
        self.relative_strength_sector = relative_strength_sector;
        self.relative_strength_peers = relative_strength_peers;
        self.trend_strength = trend_strength;
    }

    pub fn available_count(&self) -> usize {
        self.numeric_values().iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regime_round_trip() {
        for regime in Regime::ALL {
            assert_eq!(Regime::from_str(regime.as_str()).unwrap(), regime);
        }
        assert!(Regime::from_str("sideways").is_err());
    }

    #[test]
    fn test_numeric_values_round_trip() {
        let mut fv = FeatureVector::empty("X", Utc::now());
        let mut values = [None; 25];
        values[2] = Some(50.0);
        values[24] = Some(0.4);
        fv.set_numeric_values(values);
        assert_eq!(fv.sma_50, Some(50.0));
        assert_eq!(fv.trend_strength, Some(0.4));
        assert_eq!(fv.available_count(), 2);
        assert_eq!(fv.numeric_values(), values);
    }
}
