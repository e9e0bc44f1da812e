use super::ema::EMA;

#[derive(Debug, Clone)]
pub struct MACD {
    fast_ema: EMA,
    slow_ema: EMA,
    signal_ema: EMA,
    macd_line: Option<f64>,
    signal_line: Option<f64>,
    histogram: Option<f64>,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_ema: EMA::new(fast_period),
            slow_ema: EMA::new(slow_period),
            signal_ema: EMA::new(signal_period),
            macd_line: None,
            signal_line: None,
            histogram: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(12, 26, 9)
    }

    /// The MACD line becomes available before the signal line; both are reported.
    pub fn update(&mut self, price: f64) -> MACDOutput {
        let fast = self.fast_ema.update(price);
        let slow = self.slow_ema.update(price);

        if let (Some(f), Some(s)) = (fast, slow) {
            let line = f - s;
            self.macd_line = Some(line);
            if let Some(signal) = self.signal_ema.update(line) {
                self.signal_line = Some(signal);
                self.histogram = Some(line - signal);
            }
        }

        MACDOutput {
            macd_line: self.macd_line,
            signal_line: self.signal_line,
            histogram: self.histogram,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MACDOutput {
    pub macd_line: Option<f64>,
    pub signal_line: Option<f64>,
    pub histogram: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_warmup() {
        let mut macd = MACD::default_params();
        let mut first_line = None;
        let mut first_signal = None;
        for i in 0..40 {
            let out = macd.update(100.0 + i as f64);
            if out.macd_line.is_some() && first_line.is_none() {
                first_line = Some(i);
            }
            if out.signal_line.is_some() && first_signal.is_none() {
                first_signal = Some(i);
            }
        }
        assert_eq!(first_line, Some(25));
        assert_eq!(first_signal, Some(33));
        // Rising prices: fast EMA above slow EMA
        assert!(macd.macd_line.unwrap() > 0.0);
    }
}
