//! Decision agents: a weighted-random baseline and a model-backed agent that
//! turns indicator features into BUY/SELL/HOLD.

pub mod agent;
pub mod baseline;
pub mod config;
pub mod features;
pub mod indicators;
pub mod model;

pub use agent::{CandleWindow, Decision, DecisionAgent, DecisionSource, FallbackReason, ModelAgent};
pub use baseline::BaselineAgent;
pub use config::{AgentFileConfig, BaselineConfig, ModelConfig};
pub use features::FeatureSet;
pub use model::{InferenceError, LoadedModel, ModelArtifact, ProbabilityModel};
