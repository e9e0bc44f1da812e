use crate::indicators::{BollingerPosition, RSIZone};
use crate::types::{DetectedPattern, FeatureVector, MarketBar, PatternSignal};

const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;

/// Scans consecutive feature vectors for crossovers and band breakouts.
///
/// `bars` and `features` must be aligned index by index (as produced by
/// `FeatureEngine::compute_series`). A pattern is dated at the bar where it
/// completes, so re-scanning the same history yields the same keys.
pub fn detect_patterns(bars: &[MarketBar], features: &[FeatureVector]) -> Vec<DetectedPattern> {
    let mut patterns = Vec::new();

    for i in 1..features.len().min(bars.len()) {
        let prev = &features[i - 1];
        let curr = &features[i];
        let close = bars[i].close_f64();

        if let Some(p) = moving_average_cross(prev, curr) {
            patterns.push(p);
        }
        if let Some(p) = macd_cross(prev, curr) {
            patterns.push(p);
        }
        if let Some(p) = bollinger_breakout(bars[i - 1].close_f64(), close, prev, curr) {
            patterns.push(p);
        }
        if let Some(p) = rsi_extreme(prev, curr) {
            patterns.push(p);
        }
    }

    patterns
}

fn pattern(
    fv: &FeatureVector,
    pattern_type: &str,
    signal: PatternSignal,
    confidence: f64,
    strength: f64,
    description: String,
) -> DetectedPattern {
    DetectedPattern {
        symbol: fv.symbol.clone(),
        pattern_type: pattern_type.to_string(),
        pattern_start: fv.timestamp,
        pattern_end: Some(fv.timestamp),
        confidence,
        signal,
        strength: strength.clamp(0.0, 1.0),
        description,
    }
}

/// SMA 20 crossing SMA 50.
fn moving_average_cross(prev: &FeatureVector, curr: &FeatureVector) -> Option<DetectedPattern> {
    let (p_fast, p_slow, c_fast, c_slow) = (prev.sma_20?, prev.sma_50?, curr.sma_20?, curr.sma_50?);
    let gap = (c_fast - c_slow).abs() / c_slow.abs().max(f64::EPSILON);
    let strength = (gap * 100.0).min(1.0);

    if p_fast <= p_slow && c_fast > c_slow {
        Some(pattern(
            curr,
            "golden_cross",
            PatternSignal::Bullish,
            0.7,
            strength,
            format!("SMA20 {:.2} crossed above SMA50 {:.2}", c_fast, c_slow),
        ))
    } else if p_fast >= p_slow && c_fast < c_slow {
        Some(pattern(
            curr,
            "death_cross",
            PatternSignal::Bearish,
            0.7,
            strength,
            format!("SMA20 {:.2} crossed below SMA50 {:.2}", c_fast, c_slow),
        ))
    } else {
        None
    }
}

fn macd_cross(prev: &FeatureVector, curr: &FeatureVector) -> Option<DetectedPattern> {
    let (p_hist, c_hist) = (prev.macd_histogram?, curr.macd_histogram?);
    let scale = curr.macd_signal?.abs().max(curr.macd?.abs()).max(f64::EPSILON);
    let strength = (c_hist.abs() / scale).min(1.0);

    if p_hist <= 0.0 && c_hist > 0.0 {
        Some(pattern(
            curr,
            "macd_bullish_crossover",
            PatternSignal::Bullish,
            0.6,
            strength,
            "MACD crossed above its signal line".to_string(),
        ))
    } else if p_hist >= 0.0 && c_hist < 0.0 {
        Some(pattern(
            curr,
            "macd_bearish_crossover",
            PatternSignal::Bearish,
            0.6,
            strength,
            "MACD crossed below its signal line".to_string(),
        ))
    } else {
        None
    }
}

/// Close leaving the Bollinger envelope after being inside it.
fn bollinger_breakout(
    prev_close: f64,
    close: f64,
    prev: &FeatureVector,
    curr: &FeatureVector,
) -> Option<DetectedPattern> {
    let before = BollingerPosition::of(prev_close, prev.bollinger_upper?, prev.bollinger_lower?);
    let (upper, lower) = (curr.bollinger_upper?, curr.bollinger_lower?);
    let width = (upper - lower).max(f64::EPSILON);

    match (before, BollingerPosition::of(close, upper, lower)) {
        (BollingerPosition::Inside, BollingerPosition::AboveUpper) => Some(pattern(
            curr,
            "bollinger_breakout_upper",
            PatternSignal::Bullish,
            0.55,
            (close - upper) / width * 4.0,
            format!("Close {:.2} broke above upper band {:.2}", close, upper),
        )),
        (BollingerPosition::Inside, BollingerPosition::BelowLower) => Some(pattern(
            curr,
            "bollinger_breakout_lower",
            PatternSignal::Bearish,
            0.55,
            (lower - close) / width * 4.0,
            format!("Close {:.2} broke below lower band {:.2}", close, lower),
        )),
        _ => None,
    }
}

/// RSI entering overbought or oversold territory.
fn rsi_extreme(prev: &FeatureVector, curr: &FeatureVector) -> Option<DetectedPattern> {
    let (p_rsi, c_rsi) = (prev.rsi_14?, curr.rsi_14?);
    let (before, after) = (RSIZone::from_value(p_rsi), RSIZone::from_value(c_rsi));
    if before.is_extreme() || !after.is_extreme() {
        return None;
    }

    match after {
        RSIZone::Overbought => Some(pattern(
            curr,
            "rsi_overbought",
            PatternSignal::Bearish,
            0.5,
            (c_rsi - RSI_OVERBOUGHT) / (100.0 - RSI_OVERBOUGHT),
            format!("RSI {:.1} entered overbought zone", c_rsi),
        )),
        RSIZone::Oversold => Some(pattern(
            curr,
            "rsi_oversold",
            PatternSignal::Bullish,
            0.5,
            (RSI_OVERSOLD - c_rsi) / RSI_OVERSOLD,
            format!("RSI {:.1} entered oversold zone", c_rsi),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::{bar, day};

    fn fv(offset: i64) -> FeatureVector {
        FeatureVector::empty("X", day(offset))
    }

    #[test]
    fn test_golden_and_death_cross() {
        let bars = vec![bar("X", 0, 100.0), bar("X", 1, 100.0), bar("X", 2, 100.0)];
        let mut features = vec![fv(0), fv(1), fv(2)];
        (features[0].sma_20, features[0].sma_50) = (Some(99.0), Some(100.0));
        (features[1].sma_20, features[1].sma_50) = (Some(101.0), Some(100.0));
        (features[2].sma_20, features[2].sma_50) = (Some(99.5), Some(100.0));

        let patterns = detect_patterns(&bars, &features);
        let kinds: Vec<&str> = patterns.iter().map(|p| p.pattern_type.as_str()).collect();
        assert_eq!(kinds, vec!["golden_cross", "death_cross"]);
        assert_eq!(patterns[0].signal, PatternSignal::Bullish);
        assert_eq!(patterns[0].pattern_start, day(1));
    }

    #[test]
    fn test_rsi_only_fires_on_entry() {
        let bars = vec![bar("X", 0, 100.0), bar("X", 1, 100.0), bar("X", 2, 100.0)];
        let mut features = vec![fv(0), fv(1), fv(2)];
        features[0].rsi_14 = Some(65.0);
        features[1].rsi_14 = Some(75.0);
        features[2].rsi_14 = Some(80.0);

        let patterns = detect_patterns(&bars, &features);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type, "rsi_overbought");
        assert!((patterns[0].strength - 5.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_breakout() {
        let bars = vec![bar("X", 0, 100.0), bar("X", 1, 112.0)];
        let mut features = vec![fv(0), fv(1)];
        for f in features.iter_mut() {
            f.bollinger_upper = Some(110.0);
            f.bollinger_lower = Some(90.0);
        }

        let patterns = detect_patterns(&bars, &features);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type, "bollinger_breakout_upper");
        assert!((patterns[0].strength - 0.4).abs() < 1e-12);
    }
}
