use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Neutral => "NEUTRAL",
        }
    }

    /// UP/DOWN when `predicted` leaves the relative band around `reference`.
    pub fn classify(predicted: f64, reference: f64, neutral_band: f64) -> Self {
        let epsilon = reference.abs() * neutral_band;
        if predicted > reference + epsilon {
            Direction::Up
        } else if predicted < reference - epsilon {
            Direction::Down
        } else {
            Direction::Neutral
        }
    }

    /// Whether a realised move matches the call. NEUTRAL is never scored.
    pub fn is_correct(&self, actual: Decimal, prior_close: Decimal) -> Option<bool> {
        match self {
            Direction::Up => Some(actual > prior_close),
            Direction::Down => Some(actual < prior_close),
            Direction::Neutral => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Direction::Up),
            "DOWN" => Ok(Direction::Down),
            "NEUTRAL" => Ok(Direction::Neutral),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// A stored forecast for one future target date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    pub prediction_timestamp: DateTime<Utc>,
    pub target_timestamp: DateTime<Utc>,
    pub predicted_price: Decimal,
    pub confidence_lower: Decimal,
    pub confidence_upper: Decimal,
    pub confidence_level: f64,
    pub model_name: String,
    pub model_version: String,
    pub feature_version: Option<String>,
    pub predicted_direction: Direction,
    pub direction_probability: f64,
    pub actual_price: Option<Decimal>,
    pub prediction_error: Option<Decimal>,
    pub direction_correct: Option<bool>,
}

impl Prediction {
    /// Checks the invariants every stored prediction must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.target_timestamp <= self.prediction_timestamp {
            return Err(PipelineError::InvalidPrediction(format!(
                "{} target {} is not after prediction time {}",
                self.symbol, self.target_timestamp, self.prediction_timestamp
            )));
        }
        if !(0.0..=1.0).contains(&self.direction_probability) {
            return Err(PipelineError::InvalidPrediction(format!(
                "direction_probability {} outside [0, 1]",
                self.direction_probability
            )));
        }
        if self.confidence_lower > self.predicted_price || self.predicted_price > self.confidence_upper {
            return Err(PipelineError::InvalidPrediction(format!(
                "{} predicted price {} outside band [{}, {}]",
                self.symbol, self.predicted_price, self.confidence_lower, self.confidence_upper
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn prediction(
        symbol: &str,
        prediction_timestamp: DateTime<Utc>,
        target_timestamp: DateTime<Utc>,
        predicted_price: Decimal,
        direction: Direction,
    ) -> Prediction {
        Prediction {
            symbol: symbol.to_string(),
            prediction_timestamp,
            target_timestamp,
            predicted_price,
            confidence_lower: predicted_price - dec!(2),
            confidence_upper: predicted_price + dec!(2),
            confidence_level: 0.95,
            model_name: "baseline_arima".to_string(),
            model_version: "1.0.0".to_string(),
            feature_version: None,
            predicted_direction: direction,
            direction_probability: 0.7,
            actual_price: None,
            prediction_error: None,
            direction_correct: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::types::bar::test_support::day;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_classification() {
        assert_eq!(Direction::classify(101.0, 100.0, 0.001), Direction::Up);
        assert_eq!(Direction::classify(99.0, 100.0, 0.001), Direction::Down);
        assert_eq!(Direction::classify(100.05, 100.0, 0.001), Direction::Neutral);
    }

    #[test]
    fn test_direction_scoring() {
        assert_eq!(Direction::Up.is_correct(dec!(105), dec!(98)), Some(true));
        assert_eq!(Direction::Down.is_correct(dec!(105), dec!(98)), Some(false));
        assert_eq!(Direction::Neutral.is_correct(dec!(105), dec!(98)), None);
    }

    #[test]
    fn test_target_must_follow_prediction_time() {
        let p = prediction("X", day(5), day(5), dec!(100), Direction::Up);
        assert!(matches!(p.validate(), Err(PipelineError::InvalidPrediction(_))));

        let p = prediction("X", day(5), day(6), dec!(100), Direction::Up);
        assert!(p.validate().is_ok());
    }
}
