use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use common::{BotConfig, Error, FileStatusChannel, Result, SupervisorConfig};

/// Bytes of worker output quoted in a launch error.
const LOG_TAIL_BYTES: usize = 4096;

/// A spawned worker process. Owned by the registry.
#[derive(Debug)]
pub struct WorkerHandle {
    pub bot_id: String,
    pub pid: Option<u32>,
    pub launched_at: DateTime<Local>,
    child: Child,
    exit: Option<ExitStatus>,
}

/// Process state as seen by a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub running: bool,
    pub exit_code: Option<i32>,
}

impl WorkerHandle {
    /// Non-blocking liveness check. The exit status is remembered once seen.
    pub fn poll(&mut self) -> Liveness {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(bot_id = %self.bot_id, %status, "Worker exited");
                    self.exit = Some(status);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(bot_id = %self.bot_id, "Could not query worker process: {e}");
                    return Liveness {
                        running: false,
                        exit_code: None,
                    };
                }
            }
        }
        Liveness {
            running: self.exit.is_none(),
            exit_code: self.exit.and_then(|s| s.code()),
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.poll().running
    }

    /// Wait up to `grace` for the process to exit.
    pub(crate) async fn wait_for_exit(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.exit {
            return Some(status);
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit = Some(status);
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(bot_id = %self.bot_id, "Waiting on worker failed: {e}");
                None
            }
            Err(_) => None,
        }
    }

    /// Ask the worker to stop, then kill it if it is still alive after
    /// `timeout`.
    pub(crate) async fn terminate(&mut self, timeout: Duration) -> Option<ExitStatus> {
        if !self.is_alive() {
            return self.exit;
        }

        self.request_stop();
        if let Some(status) = self.wait_for_exit(timeout).await {
            info!(bot_id = %self.bot_id, %status, "Worker stopped");
            return Some(status);
        }

        warn!(bot_id = %self.bot_id, timeout_ms = timeout.as_millis() as u64, "Worker ignored stop request, killing");
        if let Err(e) = self.child.kill().await {
            warn!(bot_id = %self.bot_id, "Kill failed: {e}");
        }
        match self.child.wait().await {
            Ok(status) => {
                self.exit = Some(status);
                Some(status)
            }
            Err(e) => {
                warn!(bot_id = %self.bot_id, "Reaping killed worker failed: {e}");
                None
            }
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            warn!(bot_id = %self.bot_id, pid, "PID out of range, cannot signal");
            return;
        };
        // SAFETY: `pid` belongs to a child we have not reaped yet, so it
        // cannot have been recycled for another process.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            warn!(
                bot_id = %self.bot_id,
                "SIGTERM failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(bot_id = %self.bot_id, "Stop request failed: {e}");
        }
    }
}

/// Start a worker for `bot` with its output redirected to the bot's log in
/// the sessions directory.
pub(crate) fn spawn_worker(
    cfg: &SupervisorConfig,
    channel: &FileStatusChannel,
    bot: &BotConfig,
) -> Result<WorkerHandle> {
    let launch_error = |output: String| Error::ProcessLaunch {
        bot_id: bot.bot_id.clone(),
        output,
    };

    let program = match &cfg.worker_bin {
        Some(bin) => bin.clone(),
        None => std::env::current_exe()
            .map_err(|e| launch_error(format!("cannot resolve worker executable: {e}")))?,
    };

    std::fs::create_dir_all(channel.dir())?;
    let log_path = channel.log_path_for(&bot.bot_id);
    let stdout = std::fs::File::create(&log_path)?;
    let stderr = stdout.try_clone()?;

    let mut cmd = Command::new(&program);
    cmd.args(&cfg.worker_args)
        .arg("--bot-id")
        .arg(&bot.bot_id)
        .arg("--symbol")
        .arg(&bot.symbol)
        .arg("--data-file")
        .arg(&bot.data_file)
        .arg("--mode")
        .arg(bot.mode.to_string())
        .arg("--data-dir")
        .arg(&cfg.data_dir)
        .arg("--sessions-dir")
        .arg(&cfg.sessions_dir)
        .arg("--models-dir")
        .arg(&cfg.models_dir)
        .arg("--agent-config")
        .arg(&cfg.agent_config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| launch_error(format!("failed to spawn {}: {e}", program.display())))?;
    let pid = child.id();
    info!(bot_id = %bot.bot_id, pid, program = %program.display(), "Worker spawned");

    Ok(WorkerHandle {
        bot_id: bot.bot_id.clone(),
        pid,
        launched_at: Local::now(),
        child,
        exit: None,
    })
}

/// Last few KiB of a worker log, lossily decoded.
pub(crate) fn log_tail(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(LOG_TAIL_BYTES);
            String::from_utf8_lossy(&bytes[start..]).trim().to_string()
        }
        Err(e) => format!("<no output: {e}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_tail_keeps_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.log");
        let mut body = "x".repeat(LOG_TAIL_BYTES);
        body.push_str("\nlast line\n");
        std::fs::write(&path, body).unwrap();

        let tail = log_tail(&path);
        assert!(tail.ends_with("last line"));
        assert!(tail.len() <= LOG_TAIL_BYTES);
        assert!(log_tail(&dir.path().join("absent.log")).starts_with("<no output"));
    }
}
