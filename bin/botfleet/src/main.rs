use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{RunMode, SupervisorConfig};
use engine::{run_worker, shutdown_signal, WorkerArgs};
use supervisor::Supervisor;

#[derive(Debug, Parser)]
#[command(name = "botfleet", version, about = "Supervisor for paper-trading bot workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the control API and supervise workers (configured from the environment).
    Serve,
    /// Run a single bot. Spawned by `serve`; not meant to be run by hand.
    Worker(WorkerCli),
}

#[derive(Debug, Args)]
struct WorkerCli {
    #[arg(long)]
    bot_id: String,
    #[arg(long, default_value = "EURUSD")]
    symbol: String,
    #[arg(long)]
    data_file: String,
    #[arg(long, default_value = "backtest")]
    mode: RunMode,
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    #[arg(long, env = "SESSIONS_DIR", default_value = "sessions")]
    sessions_dir: PathBuf,
    #[arg(long, env = "MODELS_DIR", default_value = "models")]
    models_dir: PathBuf,
    #[arg(long)]
    agent_config: Option<PathBuf>,
}

impl From<WorkerCli> for WorkerArgs {
    fn from(cli: WorkerCli) -> Self {
        WorkerArgs {
            bot_id: cli.bot_id,
            symbol: cli.symbol,
            data_file: cli.data_file,
            mode: cli.mode,
            data_dir: cli.data_dir,
            sessions_dir: cli.sessions_dir,
            models_dir: cli.models_dir,
            agent_config: cli.agent_config,
        }
    }
}

fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Serve => {
            let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| panic!("Tokio runtime: {e}"));
            rt.block_on(serve())
        }
        Command::Worker(args) => {
            // One bot, one candle at a time: no need for worker threads.
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap_or_else(|e| panic!("Tokio runtime: {e}"));
            rt.block_on(async move {
                // Before the data is loaded, so an early stop is not lost.
                let shutdown = shutdown_signal();
                run_worker(args.into(), shutdown).await
            })
            .code()
        }
    };
    std::process::exit(code);
}

async fn serve() -> i32 {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = match SupervisorConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return 2;
        }
    };
    let port = cfg.control_port;

    // ── Supervisor ────────────────────────────────────────────────────────────
    let supervisor = match Supervisor::new(cfg) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Supervisor start-up failed: {e}");
            return 1;
        }
    };
    info!(port, "BotFleet starting");

    // ── Control API ───────────────────────────────────────────────────────────
    let state = api::AppState {
        supervisor: supervisor.clone(),
    };
    let code = match api::serve(state, port, shutdown_signal()).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Control API failed: {e}");
            1
        }
    };

    info!("Shutdown signal received. Stopping workers.");
    supervisor.shutdown_all().await;
    code
}
