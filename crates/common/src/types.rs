use std::collections::VecDeque;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One OHLCV interval from the market data feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Action proposed by a decision agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifecycle phase of a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPhase {
    Submitted,
    Accepted,
    Completed,
    Canceled,
    MarginRejected,
    Rejected,
}

impl OrderPhase {
    /// Terminal phases settle the order and release the order lock.
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderPhase::Submitted | OrderPhase::Accepted)
    }
}

impl std::fmt::Display for OrderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderPhase::Submitted => write!(f, "SUBMITTED"),
            OrderPhase::Accepted => write!(f, "ACCEPTED"),
            OrderPhase::Completed => write!(f, "COMPLETED"),
            OrderPhase::Canceled => write!(f, "CANCELED"),
            OrderPhase::MarginRejected => write!(f, "MARGIN REJECTED"),
            OrderPhase::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// A market order handed to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: f64,
}

impl Order {
    pub fn market(symbol: impl Into<String>, side: OrderSide, size: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            size,
        }
    }
}

/// Execution details attached to a completed order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub size: f64,
}

/// Notification emitted by the broker as an order moves through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub side: OrderSide,
    pub phase: OrderPhase,
    pub fill: Option<Fill>,
}

/// Whether a worker replays a finished file or follows a growing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Backtest,
    Live,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "backtest" => Ok(RunMode::Backtest),
            "live" => Ok(RunMode::Live),
            other => Err(Error::Config(format!(
                "mode must be 'backtest' or 'live', got '{other}'"
            ))),
        }
    }
}

/// Launch parameters of one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_id: String,
    pub symbol: String,
    /// CSV file name, resolved against the data directory unless absolute.
    pub data_file: String,
    #[serde(default)]
    pub mode: RunMode,
}

impl BotConfig {
    /// Reject configurations that cannot be launched.
    ///
    /// The bot id names files in the sessions directory, so it is limited to
    /// ASCII alphanumerics, `-` and `_`.
    pub fn validate(&self) -> Result<()> {
        validate_bot_id(&self.bot_id)?;
        if self.symbol.trim().is_empty() {
            return Err(Error::Config("symbol must not be empty".into()));
        }
        if self.data_file.trim().is_empty() {
            return Err(Error::Config("data_file must not be empty".into()));
        }
        Ok(())
    }
}

pub fn validate_bot_id(bot_id: &str) -> Result<()> {
    if bot_id.is_empty() {
        return Err(Error::Config("missing bot_id".into()));
    }
    if !bot_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Config(format!(
            "bot_id '{bot_id}' may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

/// Status label carried by every status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Initializing,
    Running,
    #[serde(rename = "Error-Data")]
    ErrorData,
    #[serde(rename = "Error-Execution")]
    ErrorExecution,
    Completed,
    Terminated,
}

impl BotStatus {
    /// The worker writes no further records after a terminal status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, BotStatus::Initializing | BotStatus::Running)
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Initializing => write!(f, "Initializing"),
            BotStatus::Running => write!(f, "Running"),
            BotStatus::ErrorData => write!(f, "Error-Data"),
            BotStatus::ErrorExecution => write!(f, "Error-Execution"),
            BotStatus::Completed => write!(f, "Completed"),
            BotStatus::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Outcome of the most recent Decide step, as published in the status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub action: Action,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Snapshot a worker publishes on its status channel.
///
/// Every publish replaces the previous record as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub bot_id: String,
    pub timestamp: DateTime<Local>,
    pub event: String,
    pub recent_logs: Vec<String>,
    pub portfolio_value: f64,
    pub cash: f64,
    pub position_size: f64,
    pub last_close: Option<f64>,
    pub status: BotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<DecisionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_capital: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_portfolio_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_pnl: Option<f64>,
}

impl StatusRecord {
    /// A fresh record for a worker that has not processed any candle yet.
    pub fn initial(bot_id: impl Into<String>, cash: f64) -> Self {
        Self {
            bot_id: bot_id.into(),
            timestamp: Local::now(),
            event: "Initializing".into(),
            recent_logs: Vec::new(),
            portfolio_value: round2(cash),
            cash: round2(cash),
            position_size: 0.0,
            last_close: None,
            status: BotStatus::Initializing,
            last_decision: None,
            error: None,
            initial_capital: None,
            final_portfolio_value: None,
            final_pnl: None,
        }
    }
}

/// Round a monetary amount to cents for publishing.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fixed-capacity log with FIFO eviction.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Oldest line first.
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_buffer_evicts_oldest_first() {
        let mut logs = LogBuffer::new(3);
        for i in 0..5 {
            logs.push(format!("line {i}"));
        }
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.to_vec(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn terminal_order_phases() {
        assert!(!OrderPhase::Submitted.is_terminal());
        assert!(!OrderPhase::Accepted.is_terminal());
        assert!(OrderPhase::Completed.is_terminal());
        assert!(OrderPhase::Canceled.is_terminal());
        assert!(OrderPhase::MarginRejected.is_terminal());
        assert!(OrderPhase::Rejected.is_terminal());
    }

    #[test]
    fn status_labels_serialize_with_hyphens() {
        let json = serde_json::to_string(&BotStatus::ErrorData).unwrap();
        assert_eq!(json, "\"Error-Data\"");
        let back: BotStatus = serde_json::from_str("\"Error-Execution\"").unwrap();
        assert_eq!(back, BotStatus::ErrorExecution);
    }

    #[test]
    fn bot_id_validation() {
        assert!(validate_bot_id("bot_1-a").is_ok());
        assert!(matches!(validate_bot_id(""), Err(Error::Config(_))));
        assert!(matches!(validate_bot_id("../etc"), Err(Error::Config(_))));
        assert!(matches!(validate_bot_id("a b"), Err(Error::Config(_))));
    }

    #[test]
    fn run_mode_parses_case_insensitively() {
        assert_eq!("LIVE".parse::<RunMode>().unwrap(), RunMode::Live);
        assert_eq!("backtest".parse::<RunMode>().unwrap(), RunMode::Backtest);
        assert!("paper".parse::<RunMode>().is_err());
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let record = StatusRecord::initial("b1", 10_000.0);
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("error").is_none());
        assert!(value.get("final_pnl").is_none());
        assert!(value.get("last_decision").is_none());
        assert_eq!(value["status"], "Initializing");
        assert!(value["last_close"].is_null());
    }
}
