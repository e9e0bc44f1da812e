/// Wilder average true range.
#[derive(Debug, Clone)]
pub struct ATR {
    period: usize,
    prev_close: Option<f64>,
    seed: Vec<f64>,
    value: Option<f64>,
}

impl ATR {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = self.true_range(high, low);
        self.prev_close = Some(close);

        match self.value {
            None => {
                self.seed.push(tr);
                if self.seed.len() == self.period {
                    self.value = Some(self.seed.iter().sum::<f64>() / self.period as f64);
                }
            }
            Some(prev_atr) => {
                let n = self.period as f64;
                self.value = Some((prev_atr * (n - 1.0) + tr) / n);
            }
        }

        self.value
    }

    fn true_range(&self, high: f64, low: f64) -> f64 {
        let hl = high - low;
        match self.prev_close {
            Some(prev_close) => hl.max((high - prev_close).abs()).max((low - prev_close).abs()),
            None => hl,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atr_constant_range() {
        let mut atr = ATR::new(14);
        let mut out = None;
        for i in 0..20 {
            let c = 100.0 + i as f64 * 0.1;
            out = atr.update(c + 1.0, c - 1.0, c);
        }
        // Gap to previous close never exceeds the 2.0 intraday range
        assert!((out.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_gap_uses_previous_close() {
        let mut atr = ATR::new(1);
        atr.update(101.0, 99.0, 100.0);
        assert_eq!(atr.update(111.0, 109.0, 110.0), Some(11.0));
    }
}
