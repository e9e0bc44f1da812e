//! Seasonal ARIMA-style baseline fitted on closing prices.
//!
//! The differenced series is modelled as
//! `x_t = Σ φ_i x_{t-i} + Σ Φ_k x_{t-k·s} + Σ θ_j e_{t-j} + e_t`
//! (additive seasonal AR terms), fitted by the two-stage Hannan-Rissanen
//! regression: a long autoregression supplies innovation estimates, then the
//! ARMA coefficients are a ridge least-squares regression on lags of the
//! series and of those innovations.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::linalg::ridge_least_squares;
use super::metrics::training_metrics;
use super::{FitReport, ForecastModel, StepForecast};
use crate::config::BaselineSettings;
use crate::error::{PipelineError, Result};
use crate::types::{MarketBar, ModelType};

/// Keeps `Σ|coef| < 1`, a sufficient condition for stationarity / invertibility.
const MAX_COEF_MASS: f64 = 0.98;
/// Residual sigma floor as a fraction of the mean price level.
const SIGMA_FLOOR_REL: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaModel {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_period: usize,
    pub training_window: usize,
    /// Mean of the differenced series (drift when `d == 1`).
    pub mean: f64,
    pub ar: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub sigma: f64,
    /// Shortest window accepted at fit time; inference enforces the same floor.
    #[serde(default)]
    pub min_history: usize,
}

impl SarimaModel {
    fn max_ar_lag(&self) -> usize {
        self.p.max(self.seasonal_p * self.seasonal_period)
    }

    /// Lags `1..=p` and `s, 2s, ..` paired with their coefficients.
    fn ar_terms(&self) -> Vec<(usize, f64)> {
        let mut terms: Vec<(usize, f64)> = self.ar.iter().enumerate().map(|(i, c)| (i + 1, *c)).collect();
        for (k, c) in self.seasonal_ar.iter().enumerate() {
            terms.push(((k + 1) * self.seasonal_period, *c));
        }
        terms
    }

    pub fn fit(bars: &[MarketBar], settings: &BaselineSettings) -> Result<(Self, FitReport)> {
        let closes: Vec<f64> = tail(bars, settings.training_window)
            .iter()
            .map(|b| b.close_f64())
            .collect();

        let mut model = Self {
            p: settings.p,
            d: settings.d.min(1),
            q: settings.q,
            seasonal_p: settings.seasonal_p,
            seasonal_period: settings.seasonal_period.max(1),
            training_window: settings.training_window,
            mean: 0.0,
            ar: vec![0.0; settings.p],
            seasonal_ar: vec![0.0; settings.seasonal_p],
            ma: vec![0.0; settings.q],
            sigma: 0.0,
            min_history: 0,
        };

        let required = model.required_history().max(settings.min_history);
        model.min_history = required;
        if closes.len() < required {
            return Err(PipelineError::InsufficientHistory {
                symbol: bars.first().map(|b| b.symbol.clone()).unwrap_or_default(),
                required,
                available: closes.len(),
            });
        }

        // 80/20 chronological split; coefficients come from the first part only
        let split = ((closes.len() as f64) * 0.8).round() as usize;
        let split = split.clamp(required.min(closes.len()), closes.len());
        model.estimate(&closes[..split], settings.ridge);

        let fitted = model.one_step_levels(&closes);
        let start = model.d + model.max_ar_lag();
        let (train_idx, val_idx) = (start.max(1)..split, split.max(1)..closes.len());

        let pick = |range: std::ops::Range<usize>| {
            let prev: Vec<f64> = range.clone().map(|t| closes[t - 1]).collect();
            let actual: Vec<f64> = range.clone().map(|t| closes[t]).collect();
            let pred: Vec<f64> = range.map(|t| fitted[t]).collect();
            (prev, actual, pred)
        };
        let (tp, ta, tf) = pick(train_idx.clone());
        let (vp, va, vf) = pick(val_idx);
        let metrics = training_metrics((&tp, &ta, &tf), (&vp, &va, &vf));

        debug!(
            ar = ?model.ar,
            seasonal_ar = ?model.seasonal_ar,
            ma = ?model.ma,
            sigma = model.sigma,
            "Fitted seasonal ARIMA"
        );

        Ok((
            model,
            FitReport {
                training_samples: train_idx.len(),
                metrics,
                feature_importance: Default::default(),
            },
        ))
    }

    fn required_history(&self) -> usize {
        self.d + self.max_ar_lag() + self.q + 10
    }

    fn difference(&self, closes: &[f64]) -> Vec<f64> {
        if self.d == 1 {
            closes.windows(2).map(|w| w[1] - w[0]).collect()
        } else {
            closes.to_vec()
        }
    }

    /// Hannan-Rissanen estimate of mean, coefficients and innovation sigma.
    fn estimate(&mut self, closes: &[f64], ridge: f64) {
        let w = self.difference(closes);
        self.mean = if w.is_empty() { 0.0 } else { w.iter().sum::<f64>() / w.len() as f64 };
        let x: Vec<f64> = w.iter().map(|v| v - self.mean).collect();

        // Stage 1: long autoregression for innovation estimates
        let long_order = (self.max_ar_lag() + self.q).max(5).min(x.len() / 4).max(1);
        let long_coefs = fit_lagged(&x, &(1..=long_order).collect::<Vec<_>>(), &[], &[], ridge);
        let mut innovations = vec![0.0; x.len()];
        for t in long_order..x.len() {
            let pred: f64 = (1..=long_order).map(|l| long_coefs[l - 1] * x[t - l]).sum();
            innovations[t] = x[t] - pred;
        }

        // Stage 2: regress on series lags and innovation lags
        let ar_lags: Vec<usize> = self.ar_terms().iter().map(|(lag, _)| *lag).collect();
        let ma_lags: Vec<usize> = (1..=self.q).collect();
        let coefs = fit_lagged(&x, &ar_lags, &innovations, &ma_lags, ridge);

        let (ar_part, ma_part) = coefs.split_at(ar_lags.len());
        let mut ar: Vec<f64> = ar_part.to_vec();
        let mut ma: Vec<f64> = ma_part.to_vec();
        shrink_mass(&mut ar);
        shrink_mass(&mut ma);

        self.ar = ar[..self.p].to_vec();
        self.seasonal_ar = ar[self.p..].to_vec();
        self.ma = ma;

        let residuals = self.innovations(&x);
        let burn = self.max_ar_lag().max(self.q);
        let tail_res = &residuals[burn.min(residuals.len())..];
        let variance = if tail_res.is_empty() {
            0.0
        } else {
            tail_res.iter().map(|e| e * e).sum::<f64>() / tail_res.len() as f64
        };
        let level = closes.iter().map(|c| c.abs()).sum::<f64>() / closes.len().max(1) as f64;
        self.sigma = variance.sqrt().max(level * SIGMA_FLOOR_REL).max(1e-8);
    }

    /// Innovations of the de-meaned differenced series under the fitted coefficients.
    fn innovations(&self, x: &[f64]) -> Vec<f64> {
        let terms = self.ar_terms();
        let mut e = vec![0.0; x.len()];
        for t in 0..x.len() {
            let mut pred = 0.0;
            for (lag, c) in &terms {
                if t >= *lag {
                    pred += c * x[t - lag];
                }
            }
            for (j, c) in self.ma.iter().enumerate() {
                if t > j {
                    pred += c * e[t - j - 1];
                }
            }
            e[t] = x[t] - pred;
        }
        e
    }

    /// One-step-ahead price predictions: `out[t]` uses closes up to `t - 1`.
    /// Entries without enough history fall back to the previous close.
    fn one_step_levels(&self, closes: &[f64]) -> Vec<f64> {
        let mut out = vec![f64::NAN; closes.len()];
        if closes.is_empty() {
            return out;
        }
        out[0] = closes[0];
        let w = self.difference(closes);
        let x: Vec<f64> = w.iter().map(|v| v - self.mean).collect();
        let e = self.innovations(&x);
        let offset = closes.len() - x.len();

        for (i, (xi, ei)) in x.iter().zip(&e).enumerate() {
            let t = i + offset;
            let predicted_x = xi - ei;
            out[t] = if self.d == 1 {
                closes[t - 1] + predicted_x + self.mean
            } else {
                predicted_x + self.mean
            };
        }
        out
    }

    /// ψ-weights of the ARMA part: ψ_0 = 1, ψ_j = θ_j + Σ a_i ψ_{j-i}.
    fn psi_weights(&self, n: usize) -> Vec<f64> {
        let terms = self.ar_terms();
        let mut psi = vec![0.0; n];
        if n == 0 {
            return psi;
        }
        psi[0] = 1.0;
        for j in 1..n {
            let mut value = self.ma.get(j - 1).copied().unwrap_or(0.0);
            for (lag, c) in &terms {
                if j >= *lag {
                    value += c * psi[j - lag];
                }
            }
            psi[j] = value;
        }
        psi
    }
}

impl ForecastModel for SarimaModel {
    fn model_type(&self) -> ModelType {
        ModelType::Sarima
    }

    fn min_history(&self) -> usize {
        self.required_history().max(self.min_history)
    }

    fn forecast_path(&self, bars: &[MarketBar], horizon: usize) -> Result<Vec<StepForecast>> {
        let closes: Vec<f64> = tail(bars, self.training_window)
            .iter()
            .map(|b| b.close_f64())
            .collect();
        let last = *closes.last().ok_or_else(|| PipelineError::Model("empty bar window".to_string()))?;
        if closes.iter().any(|c| !c.is_finite()) {
            return Err(PipelineError::Model("non-finite close in window".to_string()));
        }

        let w = self.difference(&closes);
        let mut x: Vec<f64> = w.iter().map(|v| v - self.mean).collect();
        let mut e = self.innovations(&x);
        let terms = self.ar_terms();

        let mut steps = Vec::with_capacity(horizon);
        let mut level = last;
        for _ in 0..horizon {
            let t = x.len();
            let mut next = 0.0;
            for (lag, c) in &terms {
                if t >= *lag {
                    next += c * x[t - lag];
                }
            }
            for (j, c) in self.ma.iter().enumerate() {
                if t > j {
                    next += c * e[t - j - 1];
                }
            }
            x.push(next);
            e.push(0.0);

            let w_next = next + self.mean;
            level = if self.d == 1 { level + w_next } else { w_next };
            steps.push(level);
        }

        // Integrated error variance: σ² Σ_{j<h} (Σ_{k<=j} ψ_k)²
        let psi = self.psi_weights(horizon);
        let mut cumulative = 0.0;
        let mut variance = 0.0;
        let forecasts: Vec<StepForecast> = steps
            .into_iter()
            .zip(psi)
            .map(|(mean, weight)| {
                let term = if self.d == 1 {
                    cumulative += weight;
                    cumulative
                } else {
                    weight
                };
                variance += term * term;
                StepForecast {
                    mean,
                    std_dev: self.sigma * variance.sqrt(),
                }
            })
            .collect();

        Ok(forecasts)
    }
}

fn tail(bars: &[MarketBar], window: usize) -> &[MarketBar] {
    if window == 0 || bars.len() <= window {
        bars
    } else {
        &bars[bars.len() - window..]
    }
}

/// Regresses `x_t` on `x_{t-l}` for `ar_lags` and `e_{t-l}` for `ma_lags`.
fn fit_lagged(x: &[f64], ar_lags: &[usize], e: &[f64], ma_lags: &[usize], ridge: f64) -> Vec<f64> {
    let k = ar_lags.len() + ma_lags.len();
    let start = ar_lags.iter().chain(ma_lags).copied().max().unwrap_or(0);
    if k == 0 || x.len() <= start {
        return vec![0.0; k];
    }

    let rows = x.len() - start;
    let mut design = Array2::<f64>::zeros((rows, k));
    let mut target = Array1::<f64>::zeros(rows);
    for (r, t) in (start..x.len()).enumerate() {
        for (c, lag) in ar_lags.iter().enumerate() {
            design[[r, c]] = x[t - lag];
        }
        for (c, lag) in ma_lags.iter().enumerate() {
            design[[r, ar_lags.len() + c]] = e.get(t - lag).copied().unwrap_or(0.0);
        }
        target[r] = x[t];
    }

    ridge_least_squares(&design, &target, ridge).to_vec()
}

fn shrink_mass(coefs: &mut [f64]) {
    let mass: f64 = coefs.iter().map(|c| c.abs()).sum();
    if mass >= MAX_COEF_MASS {
        let scale = MAX_COEF_MASS / mass;
        coefs.iter_mut().for_each(|c| *c *= scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::{bar, rising_bars};

    #[test]
    fn test_monotonic_series_forecasts_upward() {
        let bars = rising_bars("X", 60, 100.0, 160.0);
        let (model, report) = SarimaModel::fit(&bars, &BaselineSettings::default()).unwrap();
        let path = model.forecast_path(&bars, 5).unwrap();

        assert_eq!(path.len(), 5);
        let last = bars.last().unwrap().close_f64();
        let mut prev = last;
        for step in &path {
            assert!(step.mean > prev, "{} should exceed {}", step.mean, prev);
            prev = step.mean;
        }
        assert!((path[0].mean - (last + 60.0 / 59.0)).abs() < 0.05);
        assert!(report.metrics.val_rmse.unwrap() < 0.05);
    }

    #[test]
    fn test_interval_widens_with_horizon() {
        let bars: Vec<_> = (0..120)
            .map(|i| {
                let t = i as f64;
                bar("X", i, 100.0 + 0.2 * t + 3.0 * (t * 0.7).sin() + 1.5 * (t * 2.3).cos())
            })
            .collect();
        let (model, _) = SarimaModel::fit(&bars, &BaselineSettings::default()).unwrap();
        let path = model.forecast_path(&bars, 10).unwrap();

        for pair in path.windows(2) {
            assert!(pair[1].std_dev >= pair[0].std_dev);
        }
        assert!(path[9].std_dev > path[0].std_dev);
        assert!(path.iter().all(|s| s.mean.is_finite()));
    }

    #[test]
    fn test_short_history_is_rejected() {
        let bars = rising_bars("X", 12, 100.0, 110.0);
        let err = SarimaModel::fit(&bars, &BaselineSettings::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientHistory { available: 12, .. }));
    }

    #[test]
    fn test_fitted_minimum_is_kept_for_inference() {
        let settings = BaselineSettings::default();
        let (model, _) = SarimaModel::fit(&rising_bars("X", 60, 100.0, 160.0), &settings).unwrap();
        assert_eq!(model.min_history(), settings.min_history);

        let restored: SarimaModel = serde_json::from_str(&serde_json::to_string(&model).unwrap()).unwrap();
        assert_eq!(restored.min_history(), settings.min_history);
    }

    #[test]
    fn test_psi_weights_of_pure_ar1() {
        let model = SarimaModel {
            p: 1,
            d: 0,
            q: 0,
            seasonal_p: 0,
            seasonal_period: 5,
            training_window: 0,
            mean: 0.0,
            ar: vec![0.5],
            seasonal_ar: vec![],
            ma: vec![],
            sigma: 1.0,
            min_history: 0,
        };
        let psi = model.psi_weights(4);
        assert_eq!(psi, vec![1.0, 0.5, 0.25, 0.125]);
    }
}
