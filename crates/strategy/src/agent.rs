use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use common::{Action, Candle, DecisionSummary, Result};

use crate::baseline::BaselineAgent;
use crate::config::{AgentFileConfig, ModelConfig};
use crate::model::LoadedModel;

/// Bounded trailing window of candles, oldest first.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

/// Which variant produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Baseline,
    Model,
}

/// Why the model-backed agent answered with a baseline decision.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    InsufficientHistory { have: usize, need: usize },
    UndefinedFeature(String),
    InferenceFailed(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::InsufficientHistory { have, need } => {
                write!(f, "insufficient history ({have}/{need})")
            }
            FallbackReason::UndefinedFeature(name) => write!(f, "feature {name} undefined"),
            FallbackReason::InferenceFailed(detail) => write!(f, "inference failed: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    /// Model probability; absent for baseline decisions.
    pub confidence: Option<f64>,
    pub source: DecisionSource,
    pub fallback: Option<FallbackReason>,
}

impl Decision {
    fn baseline(action: Action, fallback: Option<FallbackReason>) -> Self {
        let reason = match &fallback {
            None => "baseline: random weighted decision".to_string(),
            Some(why) => format!("baseline fallback: {why}"),
        };
        Self {
            action,
            reason,
            confidence: None,
            source: DecisionSource::Baseline,
            fallback,
        }
    }

    pub fn summary(&self) -> DecisionSummary {
        DecisionSummary {
            action: self.action,
            reason: self.reason.clone(),
            confidence: self.confidence,
        }
    }
}

/// Agent that consults a trained model and falls back to the baseline
/// whenever the model cannot answer.
pub struct ModelAgent {
    model: LoadedModel,
    fallback: BaselineAgent,
    buy_threshold: f64,
    sell_threshold: f64,
    min_history: usize,
}

impl ModelAgent {
    pub fn new(model: LoadedModel, settings: &ModelConfig, fallback: BaselineAgent) -> Self {
        Self {
            model,
            fallback,
            buy_threshold: settings.buy_threshold,
            sell_threshold: settings.sell_threshold,
            min_history: settings.min_history,
        }
    }

    fn decide(&mut self, window: &CandleWindow) -> Decision {
        match self.predict(window) {
            Ok(p) => {
                let action = if p > self.buy_threshold {
                    Action::Buy
                } else if p < self.sell_threshold {
                    Action::Sell
                } else {
                    Action::Hold
                };
                Decision {
                    action,
                    reason: format!("model {}: p_up={p:.3}", self.model.name),
                    confidence: Some(p),
                    source: DecisionSource::Model,
                    fallback: None,
                }
            }
            Err(why) => Decision::baseline(self.fallback.sample(), Some(why)),
        }
    }

    fn predict(&self, window: &CandleWindow) -> Result<f64, FallbackReason> {
        if window.len() < self.min_history {
            return Err(FallbackReason::InsufficientHistory {
                have: window.len(),
                need: self.min_history,
            });
        }
        let features = self
            .model
            .features
            .compute(&window.closes())
            .map_err(|undefined| FallbackReason::UndefinedFeature(undefined.0))?;
        self.model
            .model
            .predict_proba(&features)
            .map_err(|e| FallbackReason::InferenceFailed(e.to_string()))
    }
}

/// The two decision agent variants, fixed when the worker starts.
pub enum DecisionAgent {
    Baseline(BaselineAgent),
    ModelBacked(ModelAgent),
}

impl DecisionAgent {
    /// Pick the variant from the agent config and the models directory.
    ///
    /// A missing model selects the baseline; an unusable one is logged and
    /// also selects the baseline. Invalid baseline weights are an error.
    pub fn build(cfg: &AgentFileConfig, models_dir: &Path) -> Result<Self> {
        let baseline = BaselineAgent::new(&cfg.baseline)?;
        match LoadedModel::load(models_dir, &cfg.model.name) {
            Ok(Some(model)) => Ok(DecisionAgent::ModelBacked(ModelAgent::new(
                model, &cfg.model, baseline,
            ))),
            Ok(None) => {
                info!(
                    model = %cfg.model.name,
                    dir = %models_dir.display(),
                    "No trained model found, using baseline agent"
                );
                Ok(DecisionAgent::Baseline(baseline))
            }
            Err(e) => {
                warn!(model = %cfg.model.name, "Unusable model artifact, using baseline agent: {e}");
                Ok(DecisionAgent::Baseline(baseline))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DecisionAgent::Baseline(_) => "baseline",
            DecisionAgent::ModelBacked(_) => "model",
        }
    }

    pub fn decide(&mut self, window: &CandleWindow) -> Decision {
        match self {
            DecisionAgent::Baseline(agent) => Decision::baseline(agent.sample(), None),
            DecisionAgent::ModelBacked(agent) => agent.decide(window),
        }
    }
}
