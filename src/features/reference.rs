use chrono::NaiveDate;
use std::collections::HashMap;

use crate::types::BarSeries;

/// Returns of one reference instrument on one date, computed from its own bars up to that date.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReferencePoint {
    pub return_1d: Option<f64>,
    /// Simple return over the relative-strength window.
    pub return_window: Option<f64>,
}

/// Date-indexed returns for one reference instrument.
#[derive(Debug, Clone, Default)]
pub struct ReferenceReturns {
    points: HashMap<NaiveDate, ReferencePoint>,
}

impl ReferenceReturns {
    pub fn from_series(series: &BarSeries, window: usize) -> Self {
        let closes = series.closes();
        let mut points = HashMap::with_capacity(closes.len());

        for (i, bar) in series.bars.iter().enumerate() {
            let return_1d = (i >= 1).then(|| simple_return(closes[i - 1], closes[i])).flatten();
            let return_window = (i >= window && window > 0)
                .then(|| simple_return(closes[i - window], closes[i]))
                .flatten();
            points.insert(
                bar.timestamp.date_naive(),
                ReferencePoint {
                    return_1d,
                    return_window,
                },
            );
        }

        Self { points }
    }

    pub fn get(&self, date: NaiveDate) -> Option<ReferencePoint> {
        self.points.get(&date).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Sector index and peer instruments used for correlation features.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub sector: Option<ReferenceReturns>,
    pub peers: Vec<ReferenceReturns>,
}

impl ReferenceData {
    pub fn new(sector: Option<&BarSeries>, peers: &[BarSeries], window: usize) -> Self {
        Self {
            sector: sector
                .filter(|s| !s.is_empty())
                .map(|s| ReferenceReturns::from_series(s, window)),
            peers: peers
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| ReferenceReturns::from_series(p, window))
                .collect(),
        }
    }

    pub fn sector_point(&self, date: NaiveDate) -> ReferencePoint {
        self.sector
            .as_ref()
            .and_then(|s| s.get(date))
            .unwrap_or_default()
    }

    /// Equal-weight average over peers that traded on `date`.
    pub fn peer_point(&self, date: NaiveDate) -> ReferencePoint {
        let points: Vec<ReferencePoint> = self.peers.iter().filter_map(|p| p.get(date)).collect();
        ReferencePoint {
            return_1d: mean_present(points.iter().map(|p| p.return_1d)),
            return_window: mean_present(points.iter().map(|p| p.return_window)),
        }
    }
}

fn simple_return(prev: f64, curr: f64) -> Option<f64> {
    (prev > 0.0 && curr.is_finite()).then(|| curr / prev - 1.0)
}

fn mean_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Log-difference of two window returns.
pub fn relative_strength(target_return: f64, reference_return: f64) -> Option<f64> {
    if target_return <= -1.0 || reference_return <= -1.0 {
        return None;
    }
    Some((1.0 + target_return).ln() - (1.0 + reference_return).ln())
}
