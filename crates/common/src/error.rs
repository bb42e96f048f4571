use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bot {bot_id} is already running")]
    AlreadyRunning { bot_id: String },

    #[error("Bot {bot_id} exited during launch: {output}")]
    ProcessLaunch { bot_id: String, output: String },

    #[error("Bot {bot_id} is not registered")]
    NotFound { bot_id: String },

    #[error("Data feed error: {0}")]
    DataFeed(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Status channel I/O error: {0}")]
    StatusIo(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
