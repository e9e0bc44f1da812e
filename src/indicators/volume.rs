/// On-balance volume, starting at zero on the first bar.
#[derive(Debug, Clone, Default)]
pub struct OBV {
    prev_close: Option<f64>,
    value: f64,
    seen: bool,
}

impl OBV {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, close: f64, volume: f64) -> f64 {
        if let Some(prev) = self.prev_close {
            if close > prev {
                self.value += volume;
            } else if close < prev {
                self.value -= volume;
            }
        }
        self.prev_close = Some(close);
        self.seen = true;
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.seen.then_some(self.value)
    }
}

/// Current volume relative to its moving average.
pub fn volume_ratio(volume: f64, average: f64) -> Option<f64> {
    (average > 0.0).then(|| volume / average)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obv_accumulates_by_direction() {
        let mut obv = OBV::new();
        assert_eq!(obv.value(), None);
        assert_eq!(obv.update(10.0, 100.0), 0.0);
        assert_eq!(obv.update(11.0, 50.0), 50.0);
        assert_eq!(obv.update(10.5, 20.0), 30.0);
        assert_eq!(obv.update(10.5, 999.0), 30.0);
    }

    #[test]
    fn test_volume_ratio_zero_average() {
        assert_eq!(volume_ratio(10.0, 0.0), None);
        assert_eq!(volume_ratio(10.0, 5.0), Some(2.0));
    }
}
