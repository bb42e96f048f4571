//! Drives the real `botfleet` binary as a worker process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{BotConfig, BotStatus, RunMode, SupervisorConfig};
use supervisor::{BotView, RecordView, Supervisor};

fn config(root: &Path) -> SupervisorConfig {
    SupervisorConfig {
        data_dir: root.join("data"),
        sessions_dir: root.join("sessions"),
        models_dir: root.join("models"),
        agent_config_path: root.join("agent.toml"),
        launch_grace: Duration::from_secs(1),
        terminate_timeout: Duration::from_secs(5),
        status_delete_backoff: Duration::from_millis(10),
        worker_bin: Some(PathBuf::from(env!("CARGO_BIN_EXE_botfleet"))),
        ..SupervisorConfig::default()
    }
}

fn bot(id: &str, data_file: &str, mode: RunMode) -> BotConfig {
    BotConfig {
        bot_id: id.into(),
        symbol: "EURUSD".into(),
        data_file: data_file.into(),
        mode,
    }
}

fn write_csv(path: &Path, rows: usize) {
    let mut body = String::from("Date,Open,High,Low,Close,Volume\n");
    for i in 0..rows {
        let close = 1.10 + (i as f64 * 0.3).sin() * 0.02;
        body.push_str(&format!(
            "2023-{:02}-{:02},{close:.5},{:.5},{:.5},{close:.5},1000\n",
            1 + i / 28,
            1 + i % 28,
            close + 0.003,
            close - 0.003
        ));
    }
    std::fs::write(path, body).unwrap();
}

/// Poll until the worker has exited, or give up after `limit`.
async fn wait_until_exited(sup: &Supervisor, bot_id: &str, limit: Duration) -> BotView {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let view = sup.status().await.remove(bot_id).expect("bot is registered");
        if !view.running || tokio::time::Instant::now() >= deadline {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn record_status(view: &BotView) -> BotStatus {
    match &view.file {
        RecordView::Present { record } => record.status,
        other => panic!("expected a status record, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_data_file_reports_error_data() {
    let dir = tempfile::tempdir().unwrap();
    let sup = Supervisor::new(config(dir.path())).unwrap();

    sup.start(bot("nodata", "does_not_exist.csv", RunMode::Backtest))
        .await
        .unwrap();
    let view = wait_until_exited(&sup, "nodata", Duration::from_secs(20)).await;
    assert!(!view.running);
    assert_eq!(view.exit_code, Some(1));
    assert_eq!(record_status(&view), BotStatus::ErrorData);
}

#[tokio::test]
async fn backtest_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let sup = Supervisor::new(config(dir.path())).unwrap();
    write_csv(&dir.path().join("data/eurusd.csv"), 100);
    std::fs::write(dir.path().join("agent.toml"), "[baseline]\nseed = 7\n").unwrap();

    sup.start(bot("bt", "eurusd.csv", RunMode::Backtest)).await.unwrap();
    let view = wait_until_exited(&sup, "bt", Duration::from_secs(30)).await;
    assert!(!view.running);
    assert_eq!(view.exit_code, Some(0));

    let RecordView::Present { record } = &view.file else {
        panic!("expected a status record, got {:?}", view.file);
    };
    assert_eq!(record.status, BotStatus::Completed);
    assert!(record.recent_logs.len() <= 10);
    assert!(record.final_pnl.is_some());
}

#[tokio::test]
async fn live_worker_stops_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let sup = Supervisor::new(config(dir.path())).unwrap();
    write_csv(&dir.path().join("data/live.csv"), 5);

    let started = sup.start(bot("live", "live.csv", RunMode::Live)).await.unwrap();
    assert!(started.running);
    assert!(matches!(
        sup.start(bot("live", "live.csv", RunMode::Live)).await,
        Err(common::Error::AlreadyRunning { .. })
    ));

    sup.stop("live").await.unwrap();
    assert!(sup.status().await.is_empty());
    assert!(!dir.path().join("sessions/status_live.json").exists());
}

#[test]
fn worker_exit_code_reflects_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let out = std::process::Command::new(env!("CARGO_BIN_EXE_botfleet"))
        .args(["worker", "--bot-id", "direct", "--data-file", "nope.csv"])
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--sessions-dir")
        .arg(dir.path().join("sessions"))
        .arg("--models-dir")
        .arg(dir.path().join("models"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(dir.path().join("sessions/status_direct.json").exists());
}
