use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{EngineSettings, Error, LogBuffer, Result};

/// Agent and engine tuning file (TOML). Every section and field is optional.
///
/// Example `config/agent.toml`:
/// ```toml
/// [engine]
/// initial_capital = 10000.0
/// order_size = 1.0
///
/// [baseline]
/// hold = 0.8
/// buy = 0.1
/// sell = 0.1
///
/// [model]
/// name = "trading_model"
/// buy_threshold = 0.6
/// sell_threshold = 0.4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentFileConfig {
    pub engine: EngineSettings,
    pub baseline: BaselineConfig,
    pub model: ModelConfig,
}

/// Weight table of the baseline agent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub hold: f64,
    pub buy: f64,
    pub sell: f64,
    pub seed: Option<u64>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            hold: 0.8,
            buy: 0.1,
            sell: 0.1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Artifact base name inside the models directory.
    pub name: String,
    /// Probability above which the model says BUY.
    pub buy_threshold: f64,
    /// Probability below which the model says SELL.
    pub sell_threshold: f64,
    /// Candles required before the model is consulted.
    pub min_history: usize,
    /// Candles retained in the decision window.
    pub max_history: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "trading_model".to_string(),
            buy_threshold: 0.6,
            sell_threshold: 0.4,
            min_history: 60,
            max_history: 200,
        }
    }
}

impl AgentFileConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read agent config at '{}': {e}",
                    path.display()
                )))
            }
        };
        Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid agent config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.model;
        let in_unit = |x: f64| (0.0..=1.0).contains(&x);
        if !in_unit(m.buy_threshold) || !in_unit(m.sell_threshold) {
            return Err(Error::Config(
                "model thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if m.sell_threshold > m.buy_threshold {
            return Err(Error::Config(format!(
                "sell_threshold {} exceeds buy_threshold {}",
                m.sell_threshold, m.buy_threshold
            )));
        }
        if m.min_history == 0 || m.max_history < m.min_history {
            return Err(Error::Config(format!(
                "need 1 <= min_history <= max_history, got {} and {}",
                m.min_history, m.max_history
            )));
        }

        let e = &self.engine;
        if !(e.initial_capital.is_finite() && e.initial_capital > 0.0) {
            return Err(Error::Config("initial_capital must be positive".to_string()));
        }
        if !(e.order_size.is_finite() && e.order_size > 0.0) {
            return Err(Error::Config("order_size must be positive".to_string()));
        }
        if !(e.slippage_bps.is_finite() && e.slippage_bps >= 0.0) {
            return Err(Error::Config("slippage_bps must be non-negative".to_string()));
        }
        if !(1..=LogBuffer::DEFAULT_CAPACITY).contains(&e.log_capacity) {
            return Err(Error::Config(format!(
                "log_capacity must be between 1 and {}",
                LogBuffer::DEFAULT_CAPACITY
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AgentFileConfig::parse("").unwrap();
        assert_eq!(cfg, AgentFileConfig::default());
        assert_eq!(cfg.model.min_history, 60);
        assert_eq!(cfg.model.max_history, 200);
        assert_eq!(cfg.engine.log_capacity, 10);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AgentFileConfig::parse(
            r#"
            [baseline]
            seed = 42

            [model]
            buy_threshold = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.baseline.seed, Some(42));
        assert_eq!(cfg.baseline.hold, 0.8);
        assert_eq!(cfg.model.buy_threshold, 0.7);
        assert_eq!(cfg.model.sell_threshold, 0.4);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = AgentFileConfig::parse(
            "[model]\nbuy_threshold = 0.3\nsell_threshold = 0.5\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_window_smaller_than_minimum() {
        let err = AgentFileConfig::parse("[model]\nmin_history = 80\nmax_history = 50\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn log_capacity_is_bounded() {
        assert!(AgentFileConfig::parse("[engine]\nlog_capacity = 5\n").is_ok());
        assert!(AgentFileConfig::parse("[engine]\nlog_capacity = 0\n").is_err());
        assert!(AgentFileConfig::parse("[engine]\nlog_capacity = 11\n").is_err());
    }

    #[test]
    fn rejects_unknown_section() {
        assert!(AgentFileConfig::parse("[strategy]\nname = \"x\"\n").is_err());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AgentFileConfig::load(&dir.path().join("agent.toml")).unwrap();
        assert_eq!(cfg, AgentFileConfig::default());
    }

    #[test]
    fn broken_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[engine\n").unwrap();
        match AgentFileConfig::load(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("agent.toml")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
