use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};

use common::{BotStatus, FileStatusChannel, Result, RunMode, StatusRecord, StatusSink};
use paper::PaperBroker;
use strategy::{AgentFileConfig, DecisionAgent};

use crate::feed::{CandleFeed, HistoricalFeed, TailingFeed};
use crate::lifecycle::{LoopExit, StrategyLoop};

/// Everything a worker process needs to run one bot.
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub bot_id: String,
    pub symbol: String,
    /// File name inside `data_dir`.
    pub data_file: String,
    pub mode: RunMode,
    pub data_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub models_dir: PathBuf,
    /// Agent/engine tuning file; defaults apply when absent.
    pub agent_config: Option<PathBuf>,
}

impl WorkerArgs {
    pub fn data_path(&self) -> PathBuf {
        self.data_dir.join(&self.data_file)
    }
}

/// How a worker ended, as reported in its terminal status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub status: BotStatus,
}

impl WorkerExit {
    /// Process exit code: 0 for a normal end, 1 for a reported error.
    pub fn code(self) -> i32 {
        match self.status {
            BotStatus::Completed | BotStatus::Terminated => 0,
            _ => 1,
        }
    }
}

/// Run one bot to completion.
///
/// Startup failures (bad agent config, unreadable data) are published as a
/// terminal record before returning. `shutdown` is observed between candles.
pub async fn run_worker<F>(args: WorkerArgs, shutdown: F) -> WorkerExit
where
    F: Future<Output = ()>,
{
    let channel = FileStatusChannel::new(&args.sessions_dir);
    let mut sink = channel.sink();
    info!(bot_id = %args.bot_id, symbol = %args.symbol, mode = %args.mode, "Worker starting");

    let cfg = match args.agent_config.as_deref() {
        Some(path) => AgentFileConfig::load(path),
        None => Ok(AgentFileConfig::default()),
    };
    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            return fail(&mut sink, &args, 0.0, BotStatus::ErrorExecution, "Invalid agent config", e);
        }
    };
    let capital = cfg.engine.initial_capital;

    let mut feed = match open_feed(&args, &cfg) {
        Ok(feed) => feed,
        Err(e) => return fail(&mut sink, &args, capital, BotStatus::ErrorData, "Data error", e),
    };

    let agent = match DecisionAgent::build(&cfg, &args.models_dir) {
        Ok(agent) => agent,
        Err(e) => {
            return fail(&mut sink, &args, capital, BotStatus::ErrorExecution, "Invalid agent config", e);
        }
    };

    let broker = PaperBroker::new(capital, cfg.engine.slippage_bps);
    let mut strategy_loop = StrategyLoop::new(
        args.bot_id.clone(),
        args.symbol.clone(),
        cfg.engine.clone(),
        cfg.model.max_history,
        agent,
        Box::new(broker),
        Box::new(sink),
    );
    strategy_loop.announce();
    drive(&mut strategy_loop, feed.as_mut(), args.mode, shutdown).await
}

/// Run the loop to its end and publish the matching terminal record.
/// A fault inside the loop becomes an `Error-Execution` record.
async fn drive<F>(
    strategy_loop: &mut StrategyLoop,
    feed: &mut dyn CandleFeed,
    mode: RunMode,
    shutdown: F,
) -> WorkerExit
where
    F: Future<Output = ()>,
{
    let (status, event, error) = match strategy_loop.run(feed, shutdown).await {
        Ok(LoopExit::Exhausted) => match mode {
            RunMode::Backtest => (BotStatus::Completed, "Backtest finished", None),
            RunMode::Live => (BotStatus::Terminated, "Live feed closed", None),
        },
        Ok(LoopExit::Stopped) => (BotStatus::Terminated, "Stop requested", None),
        Err(e) => {
            error!(bot_id = %strategy_loop.bot_id(), "Strategy loop failed: {e}");
            (BotStatus::ErrorExecution, "Execution error", Some(e.to_string()))
        }
    };
    strategy_loop.finish(status, event, error).await;
    WorkerExit { status }
}

fn open_feed(args: &WorkerArgs, cfg: &AgentFileConfig) -> Result<Box<dyn CandleFeed>> {
    let path = args.data_path();
    Ok(match args.mode {
        RunMode::Backtest => Box::new(HistoricalFeed::from_csv(&path)?),
        RunMode::Live => Box::new(TailingFeed::open(
            &path,
            Duration::from_millis(cfg.engine.live_poll_ms.max(1)),
        )?),
    })
}

fn fail(
    sink: &mut dyn StatusSink,
    args: &WorkerArgs,
    capital: f64,
    status: BotStatus,
    event: &str,
    err: common::Error,
) -> WorkerExit {
    error!(bot_id = %args.bot_id, %status, "{event}: {err}");
    let mut record = StatusRecord::initial(args.bot_id.clone(), capital);
    record.event = event.to_string();
    record.status = status;
    record.recent_logs = vec![format!("{event}: {err}")];
    record.error = Some(err.to_string());
    if let Err(e) = sink.publish(&record) {
        error!(bot_id = %args.bot_id, "Could not publish failure record: {e}");
    }
    WorkerExit { status }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
///
/// The handlers are installed by this call rather than on first poll, so a
/// stop that arrives while the worker is still loading its data is held
/// until the loop looks for it. Must be called from within a runtime.
#[cfg(unix)]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::{signal, SignalKind};

    let handlers = signal(SignalKind::terminate()).and_then(|term| {
        let interrupt = signal(SignalKind::interrupt())?;
        Ok((term, interrupt))
    });
    async move {
        let (mut term, mut interrupt) = match handlers {
            Ok(handlers) => handlers,
            Err(e) => {
                error!("Signal handlers unavailable: {e}");
                return std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = interrupt.recv() => info!("Ctrl-C received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
    }
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => {
                error!("Ctrl-C handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use common::{Candle, EngineSettings, Error, StatusRead};
    use strategy::{BaselineAgent, BaselineConfig};

    use super::*;

    fn args(dir: &std::path::Path, data_file: &str) -> WorkerArgs {
        WorkerArgs {
            bot_id: "w1".into(),
            symbol: "EURUSD".into(),
            data_file: data_file.into(),
            mode: RunMode::Backtest,
            data_dir: dir.join("data"),
            sessions_dir: dir.join("sessions"),
            models_dir: dir.join("models"),
            agent_config: None,
        }
    }

    fn record(args: &WorkerArgs) -> StatusRecord {
        match FileStatusChannel::new(&args.sessions_dir).read(&args.bot_id) {
            StatusRead::Present(record) => record,
            other => panic!("expected a record, got {other:?}"),
        }
    }

    fn write_daily_csv(path: &std::path::Path, rows: usize) {
        let mut body = String::from("Date,Open,High,Low,Close,Volume\n");
        let start = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        for i in 0..rows {
            let day = start + chrono::Duration::days(i as i64);
            let close = 1.1 + (i as f64 * 0.1).sin() * 0.01;
            body.push_str(&format!("{day},{close},{},{},{close},100\n", close + 0.002, close - 0.002));
        }
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn missing_data_writes_error_data_record() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path(), "missing.csv");
        let exit = run_worker(args.clone(), std::future::pending()).await;
        assert_eq!(exit.status, BotStatus::ErrorData);
        assert_eq!(exit.code(), 1);

        let record = record(&args);
        assert_eq!(record.status, BotStatus::ErrorData);
        assert!(record.error.unwrap().contains("missing.csv"));
    }

    #[tokio::test]
    async fn backtest_completes_with_pnl() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path(), "eur.csv");
        write_daily_csv(&args.data_path(), 80);

        let exit = run_worker(args.clone(), std::future::pending()).await;
        assert_eq!(exit.status, BotStatus::Completed);
        assert_eq!(exit.code(), 0);

        let record = record(&args);
        assert_eq!(record.event, "Backtest finished");
        assert_eq!(record.initial_capital, Some(10_000.0));
        assert!(record.final_portfolio_value.is_some());
        assert!(record.final_pnl.is_some());
        assert!(record.recent_logs.len() <= 10);
        assert!(record.last_close.is_some());
    }

    #[tokio::test]
    async fn invalid_agent_config_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path(), "eur.csv");
        write_daily_csv(&args.data_path(), 5);
        let cfg_path = dir.path().join("agent.toml");
        std::fs::write(&cfg_path, "[model]\nbuy_threshold = 2.0\n").unwrap();
        args.agent_config = Some(cfg_path);

        let exit = run_worker(args.clone(), std::future::pending()).await;
        assert_eq!(exit.status, BotStatus::ErrorExecution);
        let record = record(&args);
        assert_eq!(record.status, BotStatus::ErrorExecution);
        assert!(record.last_close.is_none());
    }

    #[tokio::test]
    async fn shutdown_terminates_live_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path(), "live.csv");
        args.mode = RunMode::Live;
        write_daily_csv(&args.data_path(), 3);

        let exit = run_worker(
            args.clone(),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await;
        assert_eq!(exit.status, BotStatus::Terminated);
        let record = record(&args);
        assert_eq!(record.event, "Stop requested");
        assert!(record.last_close.is_some());
    }

    /// Delivers a few candles, then fails the way a broken live file does.
    struct FailingFeed {
        served: usize,
    }

    #[async_trait]
    impl CandleFeed for FailingFeed {
        async fn next_candle(&mut self) -> Result<Option<Candle>> {
            if self.served == 3 {
                return Err(Error::Execution("feed went away".into()));
            }
            self.served += 1;
            let close = 1.1 + self.served as f64 * 0.001;
            Ok(Some(Candle {
                timestamp: chrono::NaiveDate::from_ymd_opt(2024, 3, self.served as u32)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            }))
        }
    }

    #[tokio::test]
    async fn loop_fault_ends_with_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStatusChannel::new(dir.path());
        let agent = DecisionAgent::Baseline(
            BaselineAgent::new(&BaselineConfig {
                hold: 1.0,
                buy: 0.0,
                sell: 0.0,
                seed: Some(3),
            })
            .unwrap(),
        );
        let mut strategy_loop = StrategyLoop::new(
            "faulty",
            "EURUSD",
            EngineSettings::default(),
            200,
            agent,
            Box::new(PaperBroker::new(10_000.0, 0.0)),
            Box::new(channel.sink()),
        );

        let exit = drive(
            &mut strategy_loop,
            &mut FailingFeed { served: 0 },
            RunMode::Live,
            std::future::pending(),
        )
        .await;
        assert_eq!(exit.status, BotStatus::ErrorExecution);
        assert_eq!(exit.code(), 1);

        let StatusRead::Present(record) = channel.read("faulty") else {
            panic!("no terminal record");
        };
        assert_eq!(record.status, BotStatus::ErrorExecution);
        assert_eq!(record.event, "Execution error");
        assert!(record.error.as_deref().unwrap().contains("feed went away"));
        assert_eq!(record.initial_capital, Some(10_000.0));
        assert_eq!(record.final_portfolio_value, Some(10_000.0));
        assert_eq!(record.final_pnl, Some(0.0));
        assert_eq!(record.last_close, Some(1.1 + 3.0 * 0.001));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_sent_before_the_loop_starts_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path(), "live.csv");
        args.mode = RunMode::Live;
        write_daily_csv(&args.data_path(), 3);

        let shutdown = shutdown_signal();
        let sent = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(sent.success());

        let exit = tokio::time::timeout(Duration::from_secs(10), run_worker(args.clone(), shutdown))
            .await
            .expect("worker should see the stop request");
        assert_eq!(exit.status, BotStatus::Terminated);
        assert_eq!(record(&args).event, "Stop requested");
    }
}
