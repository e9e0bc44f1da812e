use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
    prices: VecDeque<f64>,
    last: Option<BollingerOutput>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Self {
        Self {
            period,
            std_dev_multiplier,
            prices: VecDeque::with_capacity(period + 1),
            last: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(20, 2.0)
    }

    pub fn update(&mut self, price: f64) -> Option<BollingerOutput> {
        self.prices.push_back(price);
        if self.prices.len() > self.period {
            self.prices.pop_front();
        }
        if self.prices.len() < self.period {
            return None;
        }

        let n = self.period as f64;
        let middle = self.prices.iter().sum::<f64>() / n;
        let variance = self.prices.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / n;
        let deviation = variance.sqrt() * self.std_dev_multiplier;

        let upper = middle + deviation;
        let lower = middle - deviation;
        let band = upper - lower;

        let out = BollingerOutput {
            upper,
            middle,
            lower,
            percent_b: if band > 0.0 { Some((price - lower) / band) } else { None },
        };
        self.last = Some(out);
        Some(out)
    }

    pub fn last(&self) -> Option<BollingerOutput> {
        self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub percent_b: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerPosition {
    AboveUpper,
    Inside,
    BelowLower,
}

impl BollingerPosition {
    pub fn of(price: f64, upper: f64, lower: f64) -> Self {
        if price > upper {
            BollingerPosition::AboveUpper
        } else if price < lower {
            BollingerPosition::BelowLower
        } else {
            BollingerPosition::Inside
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_bracket_middle() {
        let mut bb = BollingerBands::default_params();
        let mut out = None;
        for i in 0..25 {
            out = bb.update(100.0 + (i % 5) as f64);
        }
        let out = out.unwrap();
        assert!(out.lower < out.middle && out.middle < out.upper);
        assert!((out.upper - out.middle - (out.middle - out.lower)).abs() < 1e-9);
    }

    #[test]
    fn test_flat_prices_have_no_percent_b() {
        let mut bb = BollingerBands::new(5, 2.0);
        let mut out = None;
        for _ in 0..5 {
            out = bb.update(50.0);
        }
        let out = out.unwrap();
        assert_eq!(out.upper, out.lower);
        assert_eq!(out.percent_b, None);
        assert_eq!(BollingerPosition::of(51.0, out.upper, out.lower), BollingerPosition::AboveUpper);
    }
}
