use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{Error, Result, RetryPolicy, StatusRecord};

/// Destination of a worker's status records.
///
/// The strategy loop only ever publishes whole records; a backend may be a
/// file, a pipe or anything else that keeps "last write wins".
pub trait StatusSink: Send {
    fn publish(&mut self, record: &StatusRecord) -> Result<()>;
}

/// What a reader found on the status channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusRead {
    /// Nothing written yet.
    Missing,
    /// Present but not decodable (torn write, foreign content, I/O error).
    Unreadable(String),
    Present(StatusRecord),
}

/// File-backed status channel: one JSON document per bot in the sessions
/// directory.
#[derive(Debug, Clone)]
pub struct FileStatusChannel {
    dir: PathBuf,
}

impl FileStatusChannel {
    const PREFIX: &'static str = "status_";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, bot_id: &str) -> PathBuf {
        self.dir.join(format!("{}{bot_id}.json", Self::PREFIX))
    }

    /// Path of the worker's combined stdout/stderr log.
    pub fn log_path_for(&self, bot_id: &str) -> PathBuf {
        self.dir.join(format!("{bot_id}.log"))
    }

    /// Replace the record for `record.bot_id`.
    ///
    /// The JSON goes to a temp file first and is renamed over the record, so
    /// a concurrent reader sees the old or the new record, never half of one.
    pub fn write(&self, record: &StatusRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(status_io)?;
        let path = self.path_for(&record.bot_id);
        let tmp = self.dir.join(format!(".{}{}.json.tmp", Self::PREFIX, record.bot_id));

        let body = serde_json::to_vec_pretty(record)?;
        let mut file = fs::File::create(&tmp).map_err(status_io)?;
        file.write_all(&body).map_err(status_io)?;
        file.sync_data().map_err(status_io)?;
        drop(file);
        fs::rename(&tmp, &path).map_err(status_io)?;
        Ok(())
    }

    pub fn read(&self, bot_id: &str) -> StatusRead {
        let path = self.path_for(bot_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return StatusRead::Missing,
            Err(e) => return StatusRead::Unreadable(e.to_string()),
        };
        match serde_json::from_slice::<StatusRecord>(&bytes) {
            Ok(record) => StatusRead::Present(record),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Status record not decodable");
                StatusRead::Unreadable(e.to_string())
            }
        }
    }

    /// Delete the record, retrying transient failures. A record that does
    /// not exist counts as deleted.
    pub async fn remove(&self, bot_id: &str, retry: &RetryPolicy) -> Result<()> {
        let path = self.path_for(bot_id);
        retry
            .run("delete status record", || {
                let path = path.clone();
                async move {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => Ok(()),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                        Err(e) => Err(status_io(e)),
                    }
                }
            })
            .await
    }

    /// Delete every status record and worker log left in the directory,
    /// creating the directory if needed. Returns how many files were removed.
    pub fn purge_all(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir).map_err(status_io)?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(status_io)? {
            let entry = entry.map_err(status_io)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stale = (name.starts_with(Self::PREFIX) && name.ends_with(".json"))
                || name.ends_with(".json.tmp")
                || name.ends_with(".log");
            if !stale {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Could not remove stale session file"),
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Purged stale session files");
        }
        Ok(removed)
    }

    /// A sink that publishes into this channel.
    pub fn sink(&self) -> FileStatusSink {
        FileStatusSink {
            channel: self.clone(),
        }
    }
}

/// Worker-side handle on a [`FileStatusChannel`].
#[derive(Debug, Clone)]
pub struct FileStatusSink {
    channel: FileStatusChannel,
}

impl StatusSink for FileStatusSink {
    fn publish(&mut self, record: &StatusRecord) -> Result<()> {
        self.channel.write(record)
    }
}

fn status_io(e: io::Error) -> Error {
    Error::StatusIo(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BotStatus;
    use std::time::Duration;

    #[test]
    fn write_then_read_returns_latest_record() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStatusChannel::new(dir.path());

        let mut record = StatusRecord::initial("alpha", 10_000.0);
        channel.write(&record).unwrap();
        record.status = BotStatus::Running;
        record.event = "Update".into();
        channel.write(&record).unwrap();

        match channel.read("alpha") {
            StatusRead::Present(found) => {
                assert_eq!(found.status, BotStatus::Running);
                assert_eq!(found.event, "Update");
            }
            other => panic!("expected a record, got {other:?}"),
        }
        assert!(!dir.path().join(".status_alpha.json.tmp").exists());
    }

    #[test]
    fn read_tolerates_missing_and_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStatusChannel::new(dir.path());
        assert_eq!(channel.read("ghost"), StatusRead::Missing);

        fs::write(channel.path_for("torn"), b"{\"bot_id\": \"torn\", \"times").unwrap();
        assert!(matches!(channel.read("torn"), StatusRead::Unreadable(_)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStatusChannel::new(dir.path());
        let retry = RetryPolicy::new(2, Duration::from_millis(1));

        channel.write(&StatusRecord::initial("beta", 1.0)).unwrap();
        channel.remove("beta", &retry).await.unwrap();
        assert_eq!(channel.read("beta"), StatusRead::Missing);
        channel.remove("beta", &retry).await.unwrap();
    }

    #[test]
    fn purge_keeps_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStatusChannel::new(dir.path());
        channel.write(&StatusRecord::initial("a", 1.0)).unwrap();
        fs::write(channel.log_path_for("a"), "log").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(channel.purge_all().unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(channel.read("a"), StatusRead::Missing);
    }
}
