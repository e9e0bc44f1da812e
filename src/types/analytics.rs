use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate accuracy over reconciled predictions.
///
/// With `sample_size == 0` every metric is `None`: "no data yet", not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub symbol: String,
    pub model_name: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    /// Mean absolute percentage error, in percent.
    pub mape: Option<f64>,
    /// Share of scored (non-NEUTRAL) calls that were right.
    pub directional_accuracy: Option<f64>,
    pub directional_sample_size: usize,
    pub sample_size: usize,
}

impl AccuracyReport {
    pub fn empty(
        symbol: impl Into<String>,
        model_name: impl Into<String>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            model_name: model_name.into(),
            period_start,
            period_end,
            rmse: None,
            mae: None,
            mape: None,
            directional_accuracy: None,
            directional_sample_size: 0,
            sample_size: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_size == 0
    }
}

/// Rolled-up accuracy row persisted after each reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub symbol: String,
    pub model_name: String,
    pub model_version: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
    pub directional_accuracy: Option<f64>,
    pub sample_size: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSignal {
    Bullish,
    Bearish,
}

impl PatternSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternSignal::Bullish => "bullish",
            PatternSignal::Bearish => "bearish",
        }
    }
}

/// Chart pattern detected from consecutive feature vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub symbol: String,
    pub pattern_type: String,
    pub pattern_start: DateTime<Utc>,
    pub pattern_end: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub signal: PatternSignal,
    pub strength: f64,
    pub description: String,
}
