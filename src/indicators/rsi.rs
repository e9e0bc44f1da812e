/// Wilder RSI, bounded in [0, 100].
#[derive(Debug, Clone)]
pub struct RSI {
    period: usize,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    prev_price: Option<f64>,
    gains: Vec<f64>,
    losses: Vec<f64>,
    value: Option<f64>,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            avg_gain: None,
            avg_loss: None,
            prev_price: None,
            gains: Vec::with_capacity(period),
            losses: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);

            if self.gains.len() < self.period {
                self.gains.push(gain);
                self.losses.push(loss);

                if self.gains.len() == self.period {
                    self.avg_gain = Some(self.gains.iter().sum::<f64>() / self.period as f64);
                    self.avg_loss = Some(self.losses.iter().sum::<f64>() / self.period as f64);
                    self.value = self.calculate_rsi();
                }
            } else if let (Some(avg_gain), Some(avg_loss)) = (self.avg_gain, self.avg_loss) {
                let n = self.period as f64;
                self.avg_gain = Some((avg_gain * (n - 1.0) + gain) / n);
                self.avg_loss = Some((avg_loss * (n - 1.0) + loss) / n);
                self.value = self.calculate_rsi();
            }
        }

        self.prev_price = Some(price);
        self.value
    }

    fn calculate_rsi(&self) -> Option<f64> {
        match (self.avg_gain, self.avg_loss) {
            (Some(avg_gain), Some(avg_loss)) => {
                if avg_loss == 0.0 {
                    if avg_gain == 0.0 {
                        Some(50.0)
                    } else {
                        Some(100.0)
                    }
                } else {
                    let rs = avg_gain / avg_loss;
                    Some(100.0 - 100.0 / (1.0 + rs))
                }
            }
            _ => None,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RSIZone {
    Oversold,
    BearishNeutral,
    BullishNeutral,
    Overbought,
}

impl RSIZone {
    pub fn from_value(v: f64) -> Self {
        if v < 30.0 {
            RSIZone::Oversold
        } else if v > 70.0 {
            RSIZone::Overbought
        } else if v < 50.0 {
            RSIZone::BearishNeutral
        } else {
            RSIZone::BullishNeutral
        }
    }

    pub fn is_extreme(&self) -> bool {
        matches!(self, RSIZone::Oversold | RSIZone::Overbought)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_bounds() {
        let mut rising = RSI::new(14);
        for i in 0..30 {
            rising.update(100.0 + i as f64);
        }
        assert_eq!(rising.value(), Some(100.0));
        assert_eq!(rising.value().map(RSIZone::from_value), Some(RSIZone::Overbought));

        let mut zigzag = RSI::new(14);
        for i in 0..60 {
            let v = zigzag.update(100.0 + if i % 2 == 0 { 1.0 } else { -1.0 });
            if let Some(v) = v {
                assert!((0.0..=100.0).contains(&v));
            }
        }
        assert!(zigzag.value().is_some());
    }

    #[test]
    fn test_rsi_needs_period_plus_one_prices() {
        let mut rsi = RSI::new(14);
        for i in 0..14 {
            assert_eq!(rsi.update(100.0 + i as f64), None);
        }
        assert!(rsi.update(120.0).is_some());
    }
}
