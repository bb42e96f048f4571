use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use common::{Action, Error, Result};

use crate::config::BaselineConfig;

/// Weighted-random decisions. Used when no trained model is present and as
/// the fallback of the model-backed agent.
#[derive(Debug, Clone)]
pub struct BaselineAgent {
    table: [Action; 3],
    dist: WeightedIndex<f64>,
    rng: ChaCha8Rng,
}

impl BaselineAgent {
    pub fn new(cfg: &BaselineConfig) -> Result<Self> {
        let weights = [cfg.hold, cfg.buy, cfg.sell];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config(format!(
                "baseline weights must be non-negative, got hold={} buy={} sell={}",
                cfg.hold, cfg.buy, cfg.sell
            )));
        }
        let dist = WeightedIndex::new(weights)
            .map_err(|e| Error::Config(format!("invalid baseline weights: {e}")))?;
        let rng = match cfg.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            table: [Action::Hold, Action::Buy, Action::Sell],
            dist,
            rng,
        })
    }

    pub fn sample(&mut self) -> Action {
        self.table[self.dist.sample(&mut self.rng)]
    }
}
