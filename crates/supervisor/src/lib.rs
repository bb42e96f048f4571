//! Process supervisor: launches one worker process per bot, tracks the
//! handles, and merges process liveness with each worker's status record.

pub mod process;
pub mod registry;

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use common::{
    BotConfig, Error, FileStatusChannel, Result, RetryPolicy, StatusRead, StatusRecord,
    SupervisorConfig,
};

use crate::process::{log_tail, spawn_worker, Liveness};
use crate::registry::{BotSlot, Registry};

/// What the status record of a registered bot looked like.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "file_status", rename_all = "snake_case")]
pub enum RecordView {
    Present { record: StatusRecord },
    NotYetCreated,
    Unreadable { reason: String },
}

impl From<StatusRead> for RecordView {
    fn from(read: StatusRead) -> Self {
        match read {
            StatusRead::Present(record) => RecordView::Present { record },
            StatusRead::Missing => RecordView::NotYetCreated,
            StatusRead::Unreadable(reason) => RecordView::Unreadable { reason },
        }
    }
}

/// One entry of a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotView {
    pub bot_id: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub launched_at: DateTime<Local>,
    #[serde(flatten)]
    pub file: RecordView,
}

/// Result of a successful start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Started {
    pub bot_id: String,
    pub pid: Option<u32>,
    /// False when the worker already finished and reported why.
    pub running: bool,
}

pub struct Supervisor {
    cfg: SupervisorConfig,
    channel: FileStatusChannel,
    registry: Registry,
    delete_retry: RetryPolicy,
}

impl Supervisor {
    /// Create the supervisor and clear status records and logs left over
    /// from a previous run.
    pub fn new(cfg: SupervisorConfig) -> Result<Self> {
        let channel = FileStatusChannel::new(&cfg.sessions_dir);
        channel.purge_all()?;
        std::fs::create_dir_all(&cfg.data_dir)?;
        let delete_retry = RetryPolicy::new(cfg.status_delete_attempts, cfg.status_delete_backoff);
        info!(
            sessions = %cfg.sessions_dir.display(),
            data = %cfg.data_dir.display(),
            "Supervisor ready"
        );
        Ok(Self {
            cfg,
            channel,
            registry: Registry::default(),
            delete_retry,
        })
    }

    /// Bots that currently hold a worker handle.
    pub fn registered(&self) -> usize {
        self.registry.registered()
    }

    /// Launch a worker for `bot`.
    ///
    /// Fails with `AlreadyRunning` while a live worker holds the id. A worker
    /// that exits inside the launch grace without publishing a terminal
    /// record is a `ProcessLaunch` error and is not registered; one that
    /// did publish (for example `Error-Data`) is registered so its outcome
    /// stays visible through `status`.
    pub async fn start(&self, bot: BotConfig) -> Result<Started> {
        bot.validate()?;
        let slot = self.registry.slot(&bot.bot_id);
        let result = {
            let _op = slot.op.lock().await;
            self.start_locked(&slot, &bot).await
        };
        if result.is_err() {
            self.registry.release(&bot.bot_id, slot);
        }
        result
    }

    async fn start_locked(&self, slot: &BotSlot, bot: &BotConfig) -> Result<Started> {
        let previous = {
            let mut guard = slot.handle();
            if guard.as_mut().is_some_and(|handle| handle.is_alive()) {
                return Err(Error::AlreadyRunning {
                    bot_id: bot.bot_id.clone(),
                });
            }
            guard.take()
        };
        if let Some(previous) = previous {
            debug!(bot_id = %bot.bot_id, pid = previous.pid, "Replacing exited worker");
        }

        if let Err(e) = self.channel.remove(&bot.bot_id, &self.delete_retry).await {
            warn!(bot_id = %bot.bot_id, "Stale status record not removed: {e}");
        }

        let mut handle = spawn_worker(&self.cfg, &self.channel, bot)?;
        let started = match handle.wait_for_exit(self.cfg.launch_grace).await {
            None => Started {
                bot_id: bot.bot_id.clone(),
                pid: handle.pid,
                running: true,
            },
            Some(status) => {
                let reported = match self.channel.read(&bot.bot_id) {
                    StatusRead::Present(record) if record.status.is_terminal() => Some(record),
                    _ => None,
                };
                let Some(record) = reported else {
                    let tail = log_tail(&self.channel.log_path_for(&bot.bot_id));
                    warn!(bot_id = %bot.bot_id, %status, "Worker died during launch");
                    return Err(Error::ProcessLaunch {
                        bot_id: bot.bot_id.clone(),
                        output: format!("{status}\n{tail}"),
                    });
                };
                info!(
                    bot_id = %bot.bot_id,
                    status = %record.status,
                    "Worker finished during launch and reported its outcome"
                );
                Started {
                    bot_id: bot.bot_id.clone(),
                    pid: None,
                    running: false,
                }
            }
        };

        info!(bot_id = %bot.bot_id, pid = started.pid, mode = %bot.mode, "Bot started");
        slot.install(handle);
        Ok(started)
    }

    /// Terminate the bot's worker (SIGTERM, then kill after the timeout),
    /// unregister it and delete its status record on a best-effort basis.
    pub async fn stop(&self, bot_id: &str) -> Result<()> {
        let not_found = || Error::NotFound {
            bot_id: bot_id.to_string(),
        };
        let slot = self.registry.existing(bot_id).ok_or_else(not_found)?;

        let result = {
            let _op = slot.op.lock().await;
            match slot.take() {
                None => Err(not_found()),
                Some(mut handle) => {
                    let status = handle.terminate(self.cfg.terminate_timeout).await;
                    info!(bot_id, ?status, "Bot stopped");
                    if let Err(e) = self.channel.remove(bot_id, &self.delete_retry).await {
                        warn!(bot_id, "Status record left behind: {e}");
                    }
                    Ok(())
                }
            }
        };
        self.registry.release(bot_id, slot);
        result
    }

    /// Liveness and latest status record of every registered bot.
    pub async fn status(&self) -> BTreeMap<String, BotView> {
        let mut live = Vec::new();
        for (bot_id, slot) in self.registry.snapshot() {
            let mut guard = slot.handle();
            if let Some(handle) = guard.as_mut() {
                let Liveness { running, exit_code } = handle.poll();
                // An exited worker's pid may already belong to another process.
                let pid = handle.pid.filter(|_| running);
                live.push((bot_id, running, pid, exit_code, handle.launched_at));
            }
        }

        let channel = self.channel.clone();
        let ids: Vec<String> = live.iter().map(|entry| entry.0.clone()).collect();
        let reads = tokio::task::spawn_blocking(move || {
            ids.iter().map(|id| channel.read(id)).collect::<Vec<_>>()
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Status read task failed: {e}");
            Vec::new()
        });

        let mut reads = reads.into_iter();
        live.into_iter()
            .map(|(bot_id, running, pid, exit_code, launched_at)| {
                let file = reads
                    .next()
                    .map(RecordView::from)
                    .unwrap_or_else(|| RecordView::Unreadable {
                        reason: "status read aborted".to_string(),
                    });
                let view = BotView {
                    bot_id: bot_id.clone(),
                    running,
                    pid,
                    exit_code,
                    launched_at,
                    file,
                };
                (bot_id, view)
            })
            .collect()
    }

    /// Stop every registered bot. Used when the control process exits.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|(_, slot)| slot.is_registered())
            .map(|(id, _)| id)
            .collect();
        info!(bots = ids.len(), "Stopping all bots");
        for id in ids {
            match self.stop(&id).await {
                Ok(()) | Err(Error::NotFound { .. }) => {}
                Err(e) => warn!(bot_id = %id, "Stop during shutdown failed: {e}"),
            }
        }
    }

    /// CSV files available in the data directory.
    pub fn list_datasets(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.cfg.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.to_ascii_lowercase().ends_with(".csv") && entry.file_type()?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
