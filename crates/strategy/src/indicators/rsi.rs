/// RSI (Relative Strength Index) with Wilder smoothing.
///
/// Undefined until at least `period + 1` closes are available.
#[derive(Debug, Clone, Copy)]
pub struct Rsi {
    pub period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self { period }
    }

    /// RSI of the latest close, oldest close first.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let (seed, rest) = changes.split_at(self.period);
        let n = self.period as f64;

        let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / n;
        let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;

        for &change in rest {
            avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
            avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
        }

        let value = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
        value.is_finite().then_some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_when_insufficient_data() {
        let rsi = Rsi::new(14);
        assert!(rsi.compute(&[100.0; 14]).is_none());
    }

    #[test]
    fn defined_with_exactly_period_plus_one() {
        let rsi = Rsi::new(14);
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert!(rsi.compute(&prices).is_some());
    }

    #[test]
    fn all_gains_is_100() {
        let value = Rsi::new(3).compute(&[10.0, 11.0, 12.0, 13.0, 14.0]).unwrap();
        assert!((value - 100.0).abs() < 1e-6, "Expected ~100, got {value}");
    }

    #[test]
    fn all_losses_is_0() {
        let value = Rsi::new(3).compute(&[14.0, 13.0, 12.0, 11.0, 10.0]).unwrap();
        assert!(value.abs() < 1e-6, "Expected ~0, got {value}");
    }

    #[test]
    fn stays_in_range_on_mixed_series() {
        let prices = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83, 45.10,
            45.15, 44.34, 44.09,
        ];
        let v = Rsi::new(14).compute(&prices).unwrap();
        assert!((0.0..=100.0).contains(&v), "RSI out of range: {v}");
    }
}
