/// Exponential moving average seeded with the simple average of the first
/// `period` values.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    pub period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self { period }
    }

    /// EMA for every position from `period - 1` onwards (oldest first).
    /// Empty when there are fewer than `period` values.
    pub fn series(&self, values: &[f64]) -> Vec<f64> {
        if values.len() < self.period {
            return Vec::new();
        }
        let k = 2.0 / (self.period as f64 + 1.0);
        let seed = values[..self.period].iter().sum::<f64>() / self.period as f64;

        let mut out = Vec::with_capacity(values.len() - self.period + 1);
        out.push(seed);
        let mut current = seed;
        for &value in &values[self.period..] {
            current = value * k + current * (1.0 - k);
            out.push(current);
        }
        out
    }

    /// Latest EMA value, `None` until `period` values are available.
    pub fn compute(&self, values: &[f64]) -> Option<f64> {
        self.series(values).last().copied().filter(|v| v.is_finite())
    }
}
