use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::reference::{relative_strength, ReferenceData};
use super::regime::{classify_regime, RegimeInputs};
use crate::config::FeatureSettings;
use crate::indicators::{
    sample_stddev, volume_ratio, BollingerBands, RollingCorrelation, ATR, EMA, MACD, OBV, RSI, SMA,
};
use crate::types::{BarSeries, FeatureVector, MarketBar};

/// Longest lookback among the features; shorter histories leave fields absent.
pub const LONGEST_LOOKBACK: usize = 50;

/// Streaming feature computation over one symbol's bars, oldest first.
///
/// Each call to [`update`](Self::update) only sees bars already fed in, so a
/// vector emitted at bar `t` never depends on bars after `t`.
struct FeatureState {
    settings: FeatureSettings,
    sma_5: SMA,
    sma_20: SMA,
    sma_50: SMA,
    ema_12: EMA,
    ema_26: EMA,
    rsi_14: RSI,
    macd: MACD,
    bollinger: BollingerBands,
    atr_14: ATR,
    obv: OBV,
    volume_sma_20: SMA,
    closes: Vec<f64>,
    returns: Vec<f64>,
    volatility_history: VecDeque<f64>,
    corr_sector: RollingCorrelation,
    corr_peers: RollingCorrelation,
}

impl FeatureState {
    fn new(settings: &FeatureSettings) -> Self {
        Self {
            settings: settings.clone(),
            sma_5: SMA::new(5),
            sma_20: SMA::new(20),
            sma_50: SMA::new(50),
            ema_12: EMA::new(12),
            ema_26: EMA::new(26),
            rsi_14: RSI::new(14),
            macd: MACD::default_params(),
            bollinger: BollingerBands::default_params(),
            atr_14: ATR::new(14),
            obv: OBV::new(),
            volume_sma_20: SMA::new(20),
            closes: Vec::new(),
            returns: Vec::new(),
            volatility_history: VecDeque::with_capacity(settings.volatility_lookback + 1),
            corr_sector: RollingCorrelation::new(settings.correlation_window),
            corr_peers: RollingCorrelation::new(settings.correlation_window),
        }
    }

    fn update(&mut self, bar: &MarketBar, reference: &ReferenceData) -> FeatureVector {
        let close = bar.close_f64();
        let volume = bar.volume_f64();
        let mut fv = FeatureVector::empty(bar.symbol.clone(), bar.timestamp);

        fv.sma_5 = self.sma_5.update(close);
        fv.sma_20 = self.sma_20.update(close);
        fv.sma_50 = self.sma_50.update(close);
        fv.ema_12 = self.ema_12.update(close);
        fv.ema_26 = self.ema_26.update(close);
        fv.rsi_14 = self.rsi_14.update(close);

        let macd = self.macd.update(close);
        fv.macd = macd.macd_line;
        fv.macd_signal = macd.signal_line;
        fv.macd_histogram = macd.histogram;

        if let Some(bands) = self.bollinger.update(close) {
            fv.bollinger_upper = Some(bands.upper);
            fv.bollinger_middle = Some(bands.middle);
            fv.bollinger_lower = Some(bands.lower);
        }

        fv.atr_14 = self.atr_14.update(bar.high_f64(), bar.low_f64(), close);
        fv.obv = Some(self.obv.update(close, volume));

        fv.volume_sma_20 = self.volume_sma_20.update(volume);
        fv.volume_ratio = fv.volume_sma_20.and_then(|avg| volume_ratio(volume, avg));

        // Returns
        fv.returns_1d = self.lagged_return(close, 1);
        fv.returns_5d = self.lagged_return(close, 5);
        fv.returns_20d = self.lagged_return(close, 20);
        self.closes.push(close);
        if let Some(r) = fv.returns_1d {
            self.returns.push(r);
        }

        fv.volatility_20d = if fv.returns_1d.is_some() {
            sample_stddev(&self.returns, 20)
        } else {
            None
        };

        // Sector / peers, aligned on the bar's calendar date
        let date = bar.timestamp.date_naive();
        let sector = reference.sector_point(date);
        let peers = reference.peer_point(date);

        fv.correlation_sector = self.corr_sector.update(fv.returns_1d, sector.return_1d);
        fv.correlation_peers = self.corr_peers.update(fv.returns_1d, peers.return_1d);

        let own_window = self.lagged_window_return();
        fv.relative_strength_sector = own_window
            .zip(sector.return_window)
            .and_then(|(own, other)| relative_strength(own, other));
        fv.relative_strength_peers = own_window
            .zip(peers.return_window)
            .and_then(|(own, other)| relative_strength(own, other));

        // Regime
        let volatility_mean = fv.volatility_20d.and_then(|v| self.push_volatility(v));
        let (regime, strength) = classify_regime(
            &RegimeInputs {
                sma_5: fv.sma_5,
                sma_20: fv.sma_20,
                sma_50: fv.sma_50,
                volatility: fv.volatility_20d,
                volatility_mean,
            },
            &self.settings,
        );
        fv.regime = regime;
        fv.trend_strength = strength;

        fv
    }

    /// Simple return against the close `lag` bars back; `closes` excludes the current bar.
    fn lagged_return(&self, close: f64, lag: usize) -> Option<f64> {
        let n = self.closes.len();
        if n < lag {
            return None;
        }
        let prev = self.closes[n - lag];
        (prev > 0.0).then(|| close / prev - 1.0)
    }

    /// Window return including the bar just pushed to `closes`.
    fn lagged_window_return(&self) -> Option<f64> {
        let window = self.settings.relative_strength_window;
        let n = self.closes.len();
        if window == 0 || n <= window {
            return None;
        }
        let prev = self.closes[n - 1 - window];
        (prev > 0.0).then(|| self.closes[n - 1] / prev - 1.0)
    }

    /// Records a volatility observation; returns the trailing mean once the lookback is full.
    fn push_volatility(&mut self, volatility: f64) -> Option<f64> {
        let lookback = self.settings.volatility_lookback;
        self.volatility_history.push_back(volatility);
        if self.volatility_history.len() > lookback {
            self.volatility_history.pop_front();
        }
        if lookback > 0 && self.volatility_history.len() == lookback {
            Some(self.volatility_history.iter().sum::<f64>() / lookback as f64)
        } else {
            None
        }
    }
}

/// Computes versioned feature vectors from a window of bars.
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    settings: FeatureSettings,
}

impl FeatureEngine {
    pub fn new(settings: FeatureSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FeatureSettings {
        &self.settings
    }

    /// One vector per bar, each computed only from bars at or before it.
    pub fn compute_series(&self, bars: &[MarketBar], reference: &ReferenceData) -> Vec<FeatureVector> {
        let mut state = FeatureState::new(&self.settings);
        bars.iter().map(|bar| state.update(bar, reference)).collect()
    }

    /// The vector at time `t`, using only bars with timestamp <= `t`.
    pub fn compute_at(
        &self,
        series: &BarSeries,
        reference: &ReferenceData,
        t: DateTime<Utc>,
    ) -> Option<FeatureVector> {
        let window = series.up_to(t);
        self.compute_series(window, reference).pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::{bar, day, rising_bars};
    use crate::types::Regime;

    fn engine() -> FeatureEngine {
        FeatureEngine::new(FeatureSettings::default())
    }

    #[test]
    fn test_short_history_marks_long_windows_absent() {
        let series = BarSeries::new("X", rising_bars("X", 10, 100.0, 110.0));
        let fv = engine()
            .compute_at(&series, &ReferenceData::default(), day(9))
            .unwrap();

        assert!(fv.sma_5.is_some());
        assert!(fv.sma_50.is_none());
        assert!(fv.sma_20.is_none());
        assert!(fv.returns_5d.is_some());
        assert!(fv.returns_20d.is_none());
        assert!(fv.regime.is_none());
        assert!(fv.correlation_sector.is_none());
        assert_eq!(fv.feature_version, "v1");
    }

    #[test]
    fn test_future_bars_do_not_change_past_vectors() {
        let mut bars = rising_bars("X", 70, 100.0, 140.0);
        let sector: Vec<_> = (0..70).map(|i| bar("IDX", i, 1000.0 + (i % 7) as f64)).collect();
        let reference = ReferenceData::new(Some(&BarSeries::new("IDX", sector.clone())), &[], 20);
        let series = BarSeries::new("X", bars.clone());
        let before = engine().compute_at(&series, &reference, day(60)).unwrap();

        // Inject a wild future bar into both the target and the sector index
        bars.push(bar("X", 70, 500.0));
        bars[65] = bar("X", 65, 10.0);
        let mut sector_after = sector;
        sector_after.push(bar("IDX", 70, 1.0));
        let reference_after = ReferenceData::new(Some(&BarSeries::new("IDX", sector_after)), &[], 20);
        let series_after = BarSeries::new("X", bars);
        let after = engine().compute_at(&series_after, &reference_after, day(60)).unwrap();

        assert_eq!(before, after);
        assert!(before.correlation_sector.is_some());
    }

    #[test]
    fn test_full_history_populates_every_field() {
        let bars: Vec<_> = (0..80)
            .map(|i| bar("X", i, 100.0 + i as f64 * 0.5 + ((i % 3) as f64 - 1.0)))
            .collect();
        let sector: Vec<_> = (0..80).map(|i| bar("IDX", i, 1000.0 + (i % 5) as f64 * 3.0)).collect();
        let peer: Vec<_> = (0..80).map(|i| bar("P", i, 50.0 + (i % 4) as f64)).collect();
        let reference = ReferenceData::new(
            Some(&BarSeries::new("IDX", sector)),
            &[BarSeries::new("P", peer)],
            20,
        );

        let series = engine().compute_series(&bars, &reference);
        let last = series.last().unwrap();
        assert_eq!(last.available_count(), FeatureVector::NUMERIC_NAMES.len());
        assert!(last.regime.is_some());
        let rsi = last.rsi_14.unwrap();
        assert!((0.0..=100.0).contains(&rsi));
        assert!(last.bollinger_lower.unwrap() <= last.bollinger_upper.unwrap());
    }

    #[test]
    fn test_steady_uptrend_is_trending_up() {
        let bars = rising_bars("X", 60, 100.0, 160.0);
        let fv = engine().compute_series(&bars, &ReferenceData::default()).pop().unwrap();
        assert_eq!(fv.regime, Some(Regime::TrendingUp));
        assert!(fv.trend_strength.unwrap() > 0.2);
    }
}
