//! Gradient-boosted regression trees on engineered features.
//!
//! Each row describes one bar (current features, lags, rolling return stats and
//! a regime one-hot); the target is the simple return to the next close.
//!
//! # Tree Traversal
//!
//! Trees are stored as flat node vectors. A node with `feature == -1` is a leaf;
//! otherwise the row goes `left` when `row[feature] <= threshold` or is NaN.
//!
//! # Multi-step forecasts
//!
//! Horizons beyond one step are iterative: the predicted close is appended as a
//! synthetic bar and the features are recomputed. Errors compound across steps.

use chrono::Duration;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::metrics::training_metrics;
use super::{FitReport, ForecastModel, StepForecast};
use crate::config::{AdvancedSettings, FeatureSettings};
use crate::error::{PipelineError, Result};
use crate::features::{FeatureEngine, ReferenceData, LONGEST_LOOKBACK};
use crate::types::time::is_weekday;
use crate::types::{FeatureVector, MarketBar, ModelType, Regime};

pub const INPUT_NAMES: [&str; 25] = [
    "returns_1d",
    "returns_5d",
    "returns_20d",
    "rsi_14",
    "macd",
    "macd_histogram",
    "volatility_20d",
    "volume_ratio",
    "bollinger_position",
    "close_to_sma_20",
    "trend_strength",
    "returns_1d_lag_1",
    "returns_1d_lag_2",
    "rsi_14_lag_1",
    "rsi_14_lag_2",
    "macd_lag_1",
    "macd_lag_2",
    "volatility_20d_lag_1",
    "volatility_20d_lag_2",
    "returns_mean_5",
    "returns_std_5",
    "regime_trending_up",
    "regime_trending_down",
    "regime_ranging",
    "regime_high_volatility",
];

const INPUT_COUNT: usize = INPUT_NAMES.len();
type InputRow = [f64; INPUT_COUNT];

/// Bars kept when recomputing features for inference.
const INFERENCE_WINDOW: usize = LONGEST_LOOKBACK * 5;

/// A single node in a regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionNode {
    /// Feature index to split on (-1 for leaf nodes).
    pub feature: i32,
    pub threshold: f64,
    /// Index of left child (-1 for leaf nodes).
    pub left: i32,
    /// Index of right child (-1 for leaf nodes).
    pub right: i32,
    /// Leaf output (None for internal nodes).
    pub value: Option<f64>,
}

impl RegressionNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: -1,
            threshold: 0.0,
            left: -1,
            right: -1,
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<RegressionNode>,
}

impl RegressionTree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            if node.feature < 0 {
                return node.value.unwrap_or(0.0);
            }
            let x = row.get(node.feature as usize).copied().unwrap_or(f64::NAN);
            let next = if x.is_nan() || x <= node.threshold { node.left } else { node.right };
            if next < 0 {
                return node.value.unwrap_or(0.0);
            }
            idx = next as usize;
        }
    }
}

struct TreeBuilder<'a> {
    rows: &'a [InputRow],
    targets: &'a [f64],
    max_depth: usize,
    min_samples_leaf: usize,
    nodes: Vec<RegressionNode>,
    gains: [f64; INPUT_COUNT],
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, samples: Vec<usize>) -> (RegressionTree, [f64; INPUT_COUNT]) {
        self.grow(samples, 0);
        (RegressionTree { nodes: self.nodes }, self.gains)
    }

    /// Appends the subtree for `samples` in pre-order and returns its root index.
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let mean = samples.iter().map(|&i| self.targets[i]).sum::<f64>() / samples.len().max(1) as f64;
        self.nodes.push(RegressionNode::leaf(mean));

        if depth >= self.max_depth || samples.len() < 2 * self.min_samples_leaf {
            return idx;
        }
        let Some(split) = self.best_split(&samples) else {
            return idx;
        };

        self.gains[split.feature] += split.gain;
        let left = self.grow(split.left, depth + 1);
        let right = self.grow(split.right, depth + 1);
        self.nodes[idx] = RegressionNode {
            feature: split.feature as i32,
            threshold: split.threshold,
            left: left as i32,
            right: right as i32,
            value: None,
        };
        idx
    }

    /// Largest reduction in squared error over all features and midpoints.
    /// Missing values always travel left with the lowest observed values.
    fn best_split(&self, samples: &[usize]) -> Option<Split> {
        let n = samples.len() as f64;
        let total: f64 = samples.iter().map(|&i| self.targets[i]).sum();
        let parent_score = total * total / n;
        let mut best: Option<(usize, f64, f64)> = None;

        for feature in 0..INPUT_COUNT {
            let mut missing = Vec::new();
            let mut present = Vec::new();
            for &i in samples {
                let v = self.rows[i][feature];
                if v.is_nan() {
                    missing.push(i);
                } else {
                    present.push((v, i));
                }
            }
            if present.len() < 2 {
                continue;
            }
            present.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum: f64 = missing.iter().map(|&i| self.targets[i]).sum();
            let mut left_count = missing.len();
            for k in 0..present.len() - 1 {
                left_sum += self.targets[present[k].1];
                left_count += 1;
                let (value, next_value) = (present[k].0, present[k + 1].0);
                if value == next_value {
                    continue;
                }
                let right_count = samples.len() - left_count;
                if left_count < self.min_samples_leaf || right_count < self.min_samples_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / left_count as f64 + right_sum * right_sum / right_count as f64;
                let gain = score - parent_score;
                if gain > 1e-15 && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, (value + next_value) / 2.0, gain));
                }
            }
        }

        let (feature, threshold, gain) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = samples.iter().copied().partition(|&i| {
            let v = self.rows[i][feature];
            v.is_nan() || v <= threshold
        });
        Some(Split {
            feature,
            threshold,
            gain,
            left,
            right,
        })
    }
}

fn fit_tree(
    rows: &[InputRow],
    targets: &[f64],
    max_depth: usize,
    min_samples_leaf: usize,
) -> (RegressionTree, [f64; INPUT_COUNT]) {
    let builder = TreeBuilder {
        rows,
        targets,
        max_depth,
        min_samples_leaf: min_samples_leaf.max(1),
        nodes: Vec::new(),
        gains: [0.0; INPUT_COUNT],
    };
    builder.build((0..rows.len()).collect())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingModel {
    pub learning_rate: f64,
    pub base_score: f64,
    pub trees: Vec<RegressionTree>,
    /// Standard deviation of one-step return residuals.
    pub residual_std: f64,
    pub min_history: usize,
    pub feature_settings: FeatureSettings,
}

/// Bars needed before every input feature is defined, plus one look-back row.
pub fn min_history_for(settings: &AdvancedSettings) -> usize {
    settings.min_history.max(LONGEST_LOOKBACK + 2)
}

impl GradientBoostingModel {
    /// Fits on `bars` with `features` matched by timestamp; bars without a stored
    /// vector are treated as having every feature missing.
    pub fn fit(
        bars: &[MarketBar],
        features: &[FeatureVector],
        settings: &AdvancedSettings,
        feature_settings: &FeatureSettings,
    ) -> Result<(Self, FitReport)> {
        let by_ts: HashMap<_, _> = features.iter().map(|f| (f.timestamp, f)).collect();
        let aligned: Vec<FeatureVector> = bars
            .iter()
            .map(|b| {
                by_ts
                    .get(&b.timestamp)
                    .map(|f| (*f).clone())
                    .unwrap_or_else(|| FeatureVector::empty(&b.symbol, b.timestamp))
            })
            .collect();

        let required = min_history_for(settings);
        if bars.len() < required {
            return Err(PipelineError::InsufficientHistory {
                symbol: bars.first().map(|b| b.symbol.clone()).unwrap_or_default(),
                required,
                available: bars.len(),
            });
        }
        // Rows with a known next close
        let usable = bars.len() - 1;

        let closes: Vec<f64> = bars.iter().map(|b| b.close_f64()).collect();
        let rows: Vec<InputRow> = (0..usable).map(|t| input_row(&closes, &aligned, t)).collect();
        let targets: Vec<f64> = (0..usable).map(|t| closes[t + 1] / closes[t] - 1.0).collect();
        if targets.iter().any(|r| !r.is_finite()) {
            return Err(PipelineError::Model("non-finite return in training data".to_string()));
        }

        let val_len = ((usable as f64) * settings.validation_fraction.clamp(0.0, 0.5)).round() as usize;
        let split = usable - val_len;
        let (train_rows, train_targets) = (&rows[..split], &targets[..split]);

        let base_score = train_targets.iter().sum::<f64>() / split as f64;
        let mut scores = vec![base_score; split];
        let mut trees = Vec::with_capacity(settings.n_estimators);
        let mut gains = [0.0; INPUT_COUNT];

        for _ in 0..settings.n_estimators {
            let residuals: Vec<f64> = train_targets.iter().zip(&scores).map(|(y, s)| y - s).collect();
            let (tree, tree_gains) = fit_tree(train_rows, &residuals, settings.max_depth, settings.min_samples_leaf);
            for (s, row) in scores.iter_mut().zip(train_rows) {
                *s += settings.learning_rate * tree.predict(row);
            }
            for (g, tg) in gains.iter_mut().zip(tree_gains) {
                *g += tg;
            }
            trees.push(tree);
        }

        let mut model = Self {
            learning_rate: settings.learning_rate,
            base_score,
            trees,
            residual_std: 0.0,
            min_history: required,
            feature_settings: feature_settings.clone(),
        };

        let predicted: Vec<f64> = rows.iter().map(|r| model.predict_return(r)).collect();
        let to_price = |range: std::ops::Range<usize>| {
            let prev: Vec<f64> = range.clone().map(|t| closes[t]).collect();
            let actual: Vec<f64> = range.clone().map(|t| closes[t + 1]).collect();
            let pred: Vec<f64> = range.map(|t| closes[t] * (1.0 + predicted[t])).collect();
            (prev, actual, pred)
        };
        let (tp, ta, tf) = to_price(0..split);
        let (vp, va, vf) = to_price(split..usable);
        let metrics = training_metrics((&tp, &ta, &tf), (&vp, &va, &vf));

        let residual_range = if val_len >= 2 { split..usable } else { 0..split };
        let residuals: Vec<f64> = residual_range.map(|t| targets[t] - predicted[t]).collect();
        let mean = residuals.iter().sum::<f64>() / residuals.len().max(1) as f64;
        let variance = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (residuals.len().saturating_sub(1)).max(1) as f64;
        model.residual_std = variance.sqrt().max(1e-6);

        let feature_importance = top_importance(&gains, settings.top_features);
        debug!(
            trees = model.trees.len(),
            residual_std = model.residual_std,
            "Fitted gradient boosting model"
        );

        Ok((
            model,
            FitReport {
                training_samples: split,
                metrics,
                feature_importance,
            },
        ))
    }

    pub fn predict_return(&self, row: &[f64]) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .map(|t| self.learning_rate * t.predict(row))
                .sum::<f64>()
    }
}

impl ForecastModel for GradientBoostingModel {
    fn model_type(&self) -> ModelType {
        ModelType::GradientBoosting
    }

    fn min_history(&self) -> usize {
        self.min_history.max(LONGEST_LOOKBACK + 2)
    }

    fn forecast_path(&self, bars: &[MarketBar], horizon: usize) -> Result<Vec<StepForecast>> {
        let start = bars.len().saturating_sub(INFERENCE_WINDOW);
        let mut window: Vec<MarketBar> = bars[start..].to_vec();
        let engine = FeatureEngine::new(self.feature_settings.clone());
        let reference = ReferenceData::default();
        let mut steps = Vec::with_capacity(horizon);

        for step in 1..=horizon {
            let last = window
                .last()
                .cloned()
                .ok_or_else(|| PipelineError::Model("empty bar window".to_string()))?;
            let features = engine.compute_series(&window, &reference);
            let closes: Vec<f64> = window.iter().map(|b| b.close_f64()).collect();
            let row = input_row(&closes, &features, window.len() - 1);

            let ret = self.predict_return(&row);
            let price = last.close_f64() * (1.0 + ret);
            if !price.is_finite() || price <= 0.0 {
                return Err(PipelineError::Model(format!("degenerate forecast {} at step {}", price, step)));
            }
            steps.push(StepForecast {
                mean: price,
                std_dev: self.residual_std * (step as f64).sqrt() * price,
            });

            window.push(synthetic_bar(&last, price)?);
        }

        Ok(steps)
    }
}

/// Next weekday bar carrying the predicted close.
fn synthetic_bar(last: &MarketBar, price: f64) -> Result<MarketBar> {
    let close = Decimal::from_f64(price)
        .ok_or_else(|| PipelineError::Model(format!("cannot represent {} as decimal", price)))?
        .round_dp(4);
    let mut timestamp = last.timestamp + Duration::days(1);
    while !is_weekday(timestamp.date_naive()) {
        timestamp += Duration::days(1);
    }
    Ok(MarketBar {
        symbol: last.symbol.clone(),
        timestamp,
        open: last.close,
        high: close.max(last.close),
        low: close.min(last.close),
        close,
        volume: last.volume,
        adjusted_close: close,
    })
}

fn input_row(closes: &[f64], features: &[FeatureVector], t: usize) -> InputRow {
    let missing = f64::NAN;
    let get = |idx: Option<usize>, f: fn(&FeatureVector) -> Option<f64>| {
        idx.and_then(|i| features.get(i)).and_then(f).unwrap_or(missing)
    };
    let at = Some(t);
    let lag1 = t.checked_sub(1);
    let lag2 = t.checked_sub(2);
    let fv = &features[t];
    let close = closes[t];

    let bollinger_position = match (fv.bollinger_upper, fv.bollinger_lower) {
        (Some(upper), Some(lower)) if upper > lower => (close - lower) / (upper - lower),
        _ => missing,
    };
    let close_to_sma_20 = fv.sma_20.filter(|s| *s > 0.0).map_or(missing, |s| close / s - 1.0);

    let recent: Vec<f64> = features[t.saturating_sub(4)..=t].iter().filter_map(|f| f.returns_1d).collect();
    let (returns_mean_5, returns_std_5) = if recent.len() == 5 {
        (
            crate::indicators::sma(&recent, 5).unwrap_or(missing),
            crate::indicators::sample_stddev(&recent, 5).unwrap_or(missing),
        )
    } else {
        (missing, missing)
    };

    let one_hot = |r: Regime| match fv.regime {
        Some(regime) if regime == r => 1.0,
        Some(_) => 0.0,
        None => missing,
    };

    [
        get(at, |f| f.returns_1d),
        get(at, |f| f.returns_5d),
        get(at, |f| f.returns_20d),
        get(at, |f| f.rsi_14),
        get(at, |f| f.macd),
        get(at, |f| f.macd_histogram),
        get(at, |f| f.volatility_20d),
        get(at, |f| f.volume_ratio),
        bollinger_position,
        close_to_sma_20,
        get(at, |f| f.trend_strength),
        get(lag1, |f| f.returns_1d),
        get(lag2, |f| f.returns_1d),
        get(lag1, |f| f.rsi_14),
        get(lag2, |f| f.rsi_14),
        get(lag1, |f| f.macd),
        get(lag2, |f| f.macd),
        get(lag1, |f| f.volatility_20d),
        get(lag2, |f| f.volatility_20d),
        returns_mean_5,
        returns_std_5,
        one_hot(Regime::TrendingUp),
        one_hot(Regime::TrendingDown),
        one_hot(Regime::Ranging),
        one_hot(Regime::HighVolatility),
    ]
}

/// Normalised split gains, keeping the `top` largest.
fn top_importance(gains: &[f64; INPUT_COUNT], top: usize) -> BTreeMap<String, f64> {
    let total: f64 = gains.iter().sum();
    if total <= 0.0 {
        return BTreeMap::new();
    }
    let mut ranked: Vec<(usize, f64)> = gains.iter().copied().enumerate().filter(|(_, g)| *g > 0.0).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .take(top)
        .map(|(i, g)| (INPUT_NAMES[i].to_string(), g / total))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::bar;

    fn wavy_bars(n: usize) -> Vec<MarketBar> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                bar("X", i as i64, 100.0 + 0.1 * t + 4.0 * (t * 0.45).sin())
            })
            .collect()
    }

    #[test]
    fn test_tree_learns_step_function() {
        let rows: Vec<InputRow> = (0..20)
            .map(|i| {
                let mut row = [f64::NAN; INPUT_COUNT];
                row[3] = i as f64;
                row
            })
            .collect();
        let targets: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();

        let (tree, gains) = fit_tree(&rows, &targets, 1, 1);
        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.nodes[0].feature, 3);
        assert!((tree.nodes[0].threshold - 9.5).abs() < 1e-12);
        assert!((tree.predict(&rows[2]) - 1.0).abs() < 1e-12);
        assert!((tree.predict(&rows[15]) - 5.0).abs() < 1e-12);
        assert!(gains[3] > 0.0);
    }

    #[test]
    fn test_missing_value_goes_left() {
        let tree = RegressionTree {
            nodes: vec![
                RegressionNode {
                    feature: 0,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                    value: None,
                },
                RegressionNode::leaf(-1.0),
                RegressionNode::leaf(1.0),
            ],
        };
        assert_eq!(tree.predict(&[f64::NAN]), -1.0);
        assert_eq!(tree.predict(&[0.9]), 1.0);
        assert_eq!(tree.predict(&[0.1]), -1.0);
    }

    #[test]
    fn test_fit_and_iterative_forecast() {
        let bars = wavy_bars(160);
        let engine = FeatureEngine::new(FeatureSettings::default());
        let features = engine.compute_series(&bars, &ReferenceData::default());
        let settings = AdvancedSettings {
            n_estimators: 30,
            ..AdvancedSettings::default()
        };

        let (model, report) = GradientBoostingModel::fit(&bars, &features, &settings, engine.settings()).unwrap();
        assert_eq!(model.trees.len(), 30);
        assert!(model.min_history() >= LONGEST_LOOKBACK + 2);
        assert!(report.metrics.train_rmse.is_some());
        assert!(report.metrics.val_rmse.is_some());
        assert!(!report.feature_importance.is_empty());
        assert!(report.feature_importance.len() <= settings.top_features);
        let share: f64 = report.feature_importance.values().sum();
        assert!(share <= 1.0 + 1e-9);

        let path = model.forecast_path(&bars, 5).unwrap();
        assert_eq!(path.len(), 5);
        assert!(path.iter().all(|s| s.mean.is_finite() && s.mean > 0.0 && s.std_dev > 0.0));

        let json = serde_json::to_string(&model).unwrap();
        let restored: GradientBoostingModel = serde_json::from_str(&json).unwrap();
        let replayed = restored.forecast_path(&bars, 5).unwrap();
        for (a, b) in replayed.iter().zip(&path) {
            assert!((a.mean - b.mean).abs() < 1e-6);
        }
    }

    #[test]
    fn test_short_history_is_rejected() {
        let bars = wavy_bars(8);
        let err = GradientBoostingModel::fit(&bars, &[], &AdvancedSettings::default(), &FeatureSettings::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientHistory { .. }));
    }

    #[test]
    fn test_history_floor_covers_longest_lookback() {
        // A configured minimum below the feature lookback is raised to it
        let settings = AdvancedSettings {
            min_history: 10,
            ..AdvancedSettings::default()
        };
        let err = GradientBoostingModel::fit(&wavy_bars(45), &[], &settings, &FeatureSettings::default()).unwrap_err();
        match err {
            PipelineError::InsufficientHistory { required, available, .. } => {
                assert_eq!(required, LONGEST_LOOKBACK + 2);
                assert_eq!(available, 45);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_synthetic_bar_skips_weekend() {
        // 2024-01-05 is a Friday
        let friday = bar("X", 4, 100.0);
        let next = synthetic_bar(&friday, 101.5).unwrap();
        assert_eq!(next.timestamp.date_naive().to_string(), "2024-01-08");
        assert_eq!(next.close, Decimal::from_f64(101.5).unwrap());
        assert!(next.is_valid());
    }
}
