use super::Ema;

/// MACD (Moving Average Convergence/Divergence).
///
/// MACD line = EMA(fast) − EMA(slow); signal = EMA(MACD line, signal);
/// histogram = MACD line − signal.
#[derive(Debug, Clone, Copy)]
pub struct Macd {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// MACD components at the latest close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValues {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        assert!(signal >= 1, "MACD signal period must be >= 1");
        Self { fast, slow, signal }
    }

    /// Closes needed before all three components are defined.
    pub fn min_len(&self) -> usize {
        self.slow + self.signal - 1
    }

    /// Compute MACD at the latest close (oldest first).
    /// Returns `None` if there isn't enough data.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdValues> {
        if closes.len() < self.min_len() {
            return None;
        }

        let fast = Ema::new(self.fast).series(closes);
        let slow = Ema::new(self.slow).series(closes);
        // Align the fast series (starts at fast-1) with the slow one (starts at slow-1).
        let offset = self.slow - self.fast;
        let macd_line: Vec<f64> = slow
            .iter()
            .enumerate()
            .map(|(i, s)| fast[i + offset] - s)
            .collect();

        let signal_line = Ema::new(self.signal).series(&macd_line);
        let macd = *macd_line.last()?;
        let signal = *signal_line.last()?;
        let values = MacdValues {
            macd,
            signal,
            histogram: macd - signal,
        };
        (values.macd.is_finite() && values.signal.is_finite()).then_some(values)
    }
}

impl Default for Macd {
    fn default() -> Self {
        Self::new(12, 26, 9)
    }
}
