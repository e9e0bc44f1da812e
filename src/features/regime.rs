use crate::config::FeatureSettings;
use crate::types::Regime;

/// Inputs for regime classification at one bar.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegimeInputs {
    pub sma_5: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub volatility: Option<f64>,
    /// Trailing mean of `volatility`, when enough observations exist.
    pub volatility_mean: Option<f64>,
}

/// `|sma_5 - sma_50| / sma_50`, scaled so `saturation` maps to 1.0.
pub fn trend_strength(sma_5: f64, sma_50: f64, saturation: f64) -> Option<f64> {
    if sma_50 <= 0.0 || saturation <= 0.0 {
        return None;
    }
    Some(((sma_5 - sma_50).abs() / sma_50 / saturation).clamp(0.0, 1.0))
}

/// Classifies a bar. Volatility is evaluated before trend direction.
pub fn classify_regime(inputs: &RegimeInputs, settings: &FeatureSettings) -> (Option<Regime>, Option<f64>) {
    let strength = match (inputs.sma_5, inputs.sma_50) {
        (Some(fast), Some(slow)) => trend_strength(fast, slow, settings.trend_saturation),
        _ => None,
    };

    let (Some(sma_5), Some(sma_20), Some(sma_50), Some(volatility), Some(strength)) = (
        inputs.sma_5,
        inputs.sma_20,
        inputs.sma_50,
        inputs.volatility,
        strength,
    ) else {
        return (None, strength);
    };

    let relative_spike = inputs
        .volatility_mean
        .map(|mean| mean > 0.0 && volatility > mean * settings.volatility_multiplier)
        .unwrap_or(false);

    let regime = if volatility > settings.volatility_threshold || relative_spike {
        Regime::HighVolatility
    } else if sma_5 > sma_20 && sma_20 > sma_50 && strength > settings.trend_threshold {
        Regime::TrendingUp
    } else if sma_5 < sma_20 && sma_20 < sma_50 && strength > settings.trend_threshold {
        Regime::TrendingDown
    } else {
        Regime::Ranging
    };

    (Some(regime), Some(strength))
}
