//! Feature vectors computed from a window of closes.
//!
//! Feature names follow the training pipeline's column names: `rsi`,
//! `rsi_<n>`, `ema_<n>`, `MACD_<fast>_<slow>_<signal>` (line),
//! `MACDh_…` (histogram) and `MACDs_…` (signal).

use std::fmt;

use crate::indicators::{Ema, Macd, MacdValues, Rsi};

const DEFAULT_RSI_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdPart {
    Line,
    Histogram,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Rsi { period: usize },
    Ema { period: usize },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
        part: MacdPart,
    },
}

impl FeatureKind {
    /// Parse a training-pipeline column name.
    pub fn parse(name: &str) -> Option<Self> {
        if name == "rsi" {
            return Some(FeatureKind::Rsi {
                period: DEFAULT_RSI_PERIOD,
            });
        }
        if let Some(period) = name.strip_prefix("rsi_") {
            let period = period.parse::<usize>().ok().filter(|p| *p >= 2)?;
            return Some(FeatureKind::Rsi { period });
        }
        if let Some(period) = name.strip_prefix("ema_") {
            let period = period.parse::<usize>().ok().filter(|p| *p >= 1)?;
            return Some(FeatureKind::Ema { period });
        }

        let (part, params) = if let Some(rest) = name.strip_prefix("MACDh_") {
            (MacdPart::Histogram, rest)
        } else if let Some(rest) = name.strip_prefix("MACDs_") {
            (MacdPart::Signal, rest)
        } else if let Some(rest) = name.strip_prefix("MACD_") {
            (MacdPart::Line, rest)
        } else {
            return None;
        };
        let nums: Vec<usize> = params
            .split('_')
            .map(|p| p.parse::<usize>().ok())
            .collect::<Option<Vec<_>>>()?;
        match nums.as_slice() {
            &[fast, slow, signal] if fast >= 1 && fast < slow && signal >= 1 => {
                Some(FeatureKind::Macd {
                    fast,
                    slow,
                    signal,
                    part,
                })
            }
            _ => None,
        }
    }

    /// Closes needed before the feature can be defined.
    pub fn min_history(&self) -> usize {
        match *self {
            FeatureKind::Rsi { period } => period + 1,
            FeatureKind::Ema { period } => period,
            FeatureKind::Macd { slow, signal, .. } => slow + signal - 1,
        }
    }
}

/// Ordered feature list a model was trained on.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    names: Vec<String>,
    kinds: Vec<FeatureKind>,
}

/// A feature that could not be computed from the available history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndefinedFeature(pub String);

impl fmt::Display for UndefinedFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feature {} undefined", self.0)
    }
}

impl FeatureSet {
    /// Build from column names; an unknown name is reported back.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        if names.is_empty() {
            return Err("feature list is empty".into());
        }
        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let kind = FeatureKind::parse(name).ok_or_else(|| format!("unknown feature '{name}'"))?;
            kinds.push(kind);
        }
        Ok(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            kinds,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Longest history any feature needs.
    pub fn min_history(&self) -> usize {
        self.kinds.iter().map(FeatureKind::min_history).max().unwrap_or(0)
    }

    /// Compute the vector in list order. The first feature that cannot be
    /// defined (short history or non-finite value) is reported.
    pub fn compute(&self, closes: &[f64]) -> Result<Vec<f64>, UndefinedFeature> {
        let mut macd_cache: Vec<((usize, usize, usize), Option<MacdValues>)> = Vec::new();
        let mut out = Vec::with_capacity(self.kinds.len());

        for (name, kind) in self.names.iter().zip(&self.kinds) {
            let value = match *kind {
                FeatureKind::Rsi { period } => Rsi::new(period).compute(closes),
                FeatureKind::Ema { period } => Ema::new(period).compute(closes),
                FeatureKind::Macd {
                    fast,
                    slow,
                    signal,
                    part,
                } => {
                    let key = (fast, slow, signal);
                    let values = match macd_cache.iter().find(|(k, _)| *k == key) {
                        Some((_, cached)) => *cached,
                        None => {
                            let computed = Macd::new(fast, slow, signal).compute(closes);
                            macd_cache.push((key, computed));
                            computed
                        }
                    };
                    values.map(|v| match part {
                        MacdPart::Line => v.macd,
                        MacdPart::Histogram => v.histogram,
                        MacdPart::Signal => v.signal,
                    })
                }
            };
            match value.filter(|v| v.is_finite()) {
                Some(v) => out.push(v),
                None => return Err(UndefinedFeature(name.clone())),
            }
        }
        Ok(out)
    }
}
