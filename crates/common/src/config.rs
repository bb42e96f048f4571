use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Settings of the control process, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory holding the CSV candle files.
    pub data_dir: PathBuf,
    /// Directory holding status records and worker logs.
    pub sessions_dir: PathBuf,
    /// Directory holding trained model artifacts.
    pub models_dir: PathBuf,
    /// Agent/engine tuning file handed to every worker.
    pub agent_config_path: PathBuf,

    pub control_port: u16,

    /// A worker that exits inside this window counts as a failed launch.
    pub launch_grace: Duration,
    /// How long a worker gets to exit after SIGTERM before it is killed.
    pub terminate_timeout: Duration,
    pub status_delete_attempts: u32,
    pub status_delete_backoff: Duration,

    /// Worker executable; `None` re-executes the running binary.
    pub worker_bin: Option<PathBuf>,
    /// Arguments placed before the per-bot worker arguments.
    pub worker_args: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sessions_dir: PathBuf::from("sessions"),
            models_dir: PathBuf::from("models"),
            agent_config_path: PathBuf::from("config/agent.toml"),
            control_port: 5000,
            launch_grace: Duration::from_millis(1000),
            terminate_timeout: Duration::from_millis(5000),
            status_delete_attempts: 3,
            status_delete_backoff: Duration::from_millis(500),
            worker_bin: None,
            worker_args: vec!["worker".to_string()],
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` if present. Every variable is optional; unparsable values
    /// are reported as configuration errors.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        let defaults = Self::default();

        Ok(SupervisorConfig {
            data_dir: optional_env("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            sessions_dir: optional_env("SESSIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.sessions_dir),
            models_dir: optional_env("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.models_dir),
            agent_config_path: optional_env("AGENT_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.agent_config_path),
            control_port: parsed_env("CONTROL_PORT")?.unwrap_or(defaults.control_port),
            launch_grace: parsed_env("LAUNCH_GRACE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.launch_grace),
            terminate_timeout: parsed_env("TERMINATE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.terminate_timeout),
            status_delete_attempts: parsed_env("STATUS_DELETE_ATTEMPTS")?
                .unwrap_or(defaults.status_delete_attempts),
            status_delete_backoff: parsed_env("STATUS_DELETE_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.status_delete_backoff),
            worker_bin: optional_env("WORKER_BIN").map(PathBuf::from),
            worker_args: defaults.worker_args,
        })
    }
}

/// Per-worker engine settings (`[engine]` table of the agent config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub initial_capital: f64,
    /// Units per market order.
    pub order_size: f64,
    /// Applied to paper fills: buys pay more, sells receive less.
    pub slippage_bps: f64,
    pub log_capacity: usize,
    /// Poll interval when tailing a live feed file.
    pub live_poll_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            order_size: 1.0,
            slippage_bps: 0.0,
            log_capacity: crate::LogBuffer::DEFAULT_CAPACITY,
            live_poll_ms: 1000,
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match optional_env(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::Config(format!("environment variable '{key}' has invalid value '{raw}'"))
        }),
    }
}
