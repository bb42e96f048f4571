pub mod broker;
pub mod config;
pub mod error;
pub mod retry;
pub mod status;
pub mod types;

pub use broker::{Account, Broker};
pub use config::{EngineSettings, SupervisorConfig};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use status::{FileStatusChannel, FileStatusSink, StatusRead, StatusSink};
pub use types::*;
