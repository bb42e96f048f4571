pub mod feed;
pub mod lifecycle;
pub mod runner;

pub use feed::{CandleFeed, HistoricalFeed, TailingFeed, Timeframe};
pub use lifecycle::{LoopExit, Phase, StrategyLoop};
pub use runner::{run_worker, shutdown_signal, WorkerArgs, WorkerExit};
