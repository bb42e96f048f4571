use std::collections::BTreeMap;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use common::{BotConfig, Error, RunMode};
use supervisor::BotView;

use crate::{ApiError, AppState};

pub fn bots_router() -> Router<AppState> {
    Router::new()
        .route("/start_bot", post(start_bot))
        .route("/stop_bot", post(stop_bot))
        .route("/status", get(status))
        .route("/list_datasets", get(list_datasets))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    bot_id: Option<String>,
    #[serde(default = "default_symbol")]
    symbol: String,
    #[serde(default = "default_data_file")]
    data_file: String,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_symbol() -> String {
    "EURUSD".to_string()
}

fn default_data_file() -> String {
    "sample.csv".to_string()
}

fn default_mode() -> String {
    RunMode::Backtest.to_string()
}

impl StartRequest {
    fn into_config(self) -> Result<BotConfig, Error> {
        let bot_id = self
            .bot_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Config("missing bot_id".into()))?;
        Ok(BotConfig {
            bot_id,
            symbol: self.symbol,
            data_file: self.data_file,
            mode: self.mode.parse()?,
        })
    }
}

async fn start_bot(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<Value>, ApiError> {
    let cfg = req.into_config()?;
    info!(bot_id = %cfg.bot_id, symbol = %cfg.symbol, mode = %cfg.mode, "POST /start_bot");
    let started = state.supervisor.start(cfg).await?;
    let message = if started.running {
        format!("Bot {} started", started.bot_id)
    } else {
        format!("Bot {} exited during startup, see /status", started.bot_id)
    };
    Ok(Json(json!({
        "message": message,
        "bot_id": started.bot_id,
        "pid": started.pid,
        "running": started.running,
    })))
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    bot_id: Option<String>,
}

async fn stop_bot(
    State(state): State<AppState>,
    Json(req): Json<StopRequest>,
) -> Result<Json<Value>, ApiError> {
    let bot_id = req
        .bot_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::Config("missing bot_id".into()))?;
    info!(%bot_id, "POST /stop_bot");
    state.supervisor.stop(&bot_id).await?;
    Ok(Json(json!({ "message": format!("Bot {bot_id} stopped") })))
}

async fn status(State(state): State<AppState>) -> Json<BTreeMap<String, BotView>> {
    Json(state.supervisor.status().await)
}

async fn list_datasets(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let supervisor = state.supervisor.clone();
    let datasets = tokio::task::spawn_blocking(move || supervisor.list_datasets())
        .await
        .map_err(|e| Error::Execution(format!("dataset listing task failed: {e}")))??;
    Ok(Json(datasets))
}
