use statrs::statistics::{Data, Distribution};

/// Pearson correlation of two equally long samples.
///
/// `None` when fewer than two points exist or either side has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len();
    let x_data = Data::new(x.to_vec());
    let y_data = Data::new(y.to_vec());

    let x_mean = x_data.mean()?;
    let y_mean = y_data.mean()?;
    let x_std = x_data.std_dev()?;
    let y_std = y_data.std_dev()?;
    if x_std == 0.0 || y_std == 0.0 {
        return None;
    }

    let covariance = x
        .iter()
        .zip(y.iter())
        .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
        .sum::<f64>()
        / (n - 1) as f64;

    Some((covariance / (x_std * y_std)).clamp(-1.0, 1.0))
}

/// Rolling Pearson correlation over the last `window` complete pairs.
///
/// A pair with a missing side breaks the window: the value stays unavailable
/// until `window` consecutive complete pairs have been seen again.
#[derive(Debug, Clone)]
pub struct RollingCorrelation {
    window: usize,
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl RollingCorrelation {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            xs: Vec::with_capacity(window + 1),
            ys: Vec::with_capacity(window + 1),
        }
    }

    pub fn update(&mut self, x: Option<f64>, y: Option<f64>) -> Option<f64> {
        match (x, y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => {
                self.xs.push(x);
                self.ys.push(y);
                if self.xs.len() > self.window {
                    self.xs.remove(0);
                    self.ys.remove(0);
                }
            }
            _ => {
                self.xs.clear();
                self.ys.clear();
                return None;
            }
        }

        if self.xs.len() == self.window {
            pearson(&self.xs, &self.ys)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_correlations() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        let z = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&x, &y).unwrap() - 1.0).abs() < 1e-10);
        assert!((pearson(&x, &z).unwrap() + 1.0).abs() < 1e-10);
        assert_eq!(pearson(&x, &[1.0; 5]), None);
    }

    #[test]
    fn test_rolling_window_resets_on_gap() {
        let mut corr = RollingCorrelation::new(3);
        assert_eq!(corr.update(Some(1.0), Some(1.0)), None);
        assert_eq!(corr.update(Some(2.0), Some(2.5)), None);
        assert!(corr.update(Some(3.0), Some(2.9)).is_some());
        assert_eq!(corr.update(None, Some(1.0)), None);
        assert_eq!(corr.update(Some(4.0), Some(4.0)), None);
    }
}
