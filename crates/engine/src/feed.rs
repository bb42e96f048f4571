use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::{debug, info, warn};

use common::{Candle, Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Bar interval of a candle file, detected from its timestamp layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    /// `YYYY-MM-DD` rows.
    Daily,
    /// `YYYY-MM-DD HH:MM:SS` rows.
    Minutes15,
}

impl Timeframe {
    pub fn detect(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if NaiveDate::parse_from_str(raw, DATE_FORMAT).is_ok() {
            Ok(Timeframe::Daily)
        } else if NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).is_ok() {
            Ok(Timeframe::Minutes15)
        } else {
            Err(Error::DataFeed(format!("unrecognised timestamp '{raw}'")))
        }
    }

    fn parse(self, raw: &str) -> Result<NaiveDateTime> {
        let raw = raw.trim();
        let parsed = match self {
            Timeframe::Daily => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(|d| d.and_time(chrono::NaiveTime::MIN)),
            Timeframe::Minutes15 => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT),
        };
        parsed.map_err(|e| Error::DataFeed(format!("timestamp '{raw}' does not match {self:?}: {e}")))
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timeframe::Daily => write!(f, "1d"),
            Timeframe::Minutes15 => write!(f, "15m"),
        }
    }
}

/// Ordered source of candles for the strategy loop.
#[async_trait]
pub trait CandleFeed: Send {
    /// The next candle, or `None` once the feed is exhausted or closed.
    async fn next_candle(&mut self) -> Result<Option<Candle>>;
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open")]
    open: f64,
    #[serde(rename = "High")]
    high: f64,
    #[serde(rename = "Low")]
    low: f64,
    #[serde(rename = "Close")]
    close: f64,
    #[serde(rename = "Volume")]
    volume: f64,
}

impl CsvRow {
    fn into_candle(self, timeframe: Timeframe) -> Result<Candle> {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::DataFeed(format!("non-finite value in row dated {}", self.date)));
        }
        Ok(Candle {
            timestamp: timeframe.parse(&self.date)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

/// Parse CSV bytes. `timeframe` is detected from the first row when `None`.
fn parse_rows(bytes: &[u8], timeframe: &mut Option<Timeframe>, skip: usize) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(bytes);
    let mut candles = Vec::new();
    for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| Error::DataFeed(format!("malformed row {}: {e}", i + 1)))?;
        let tf = match *timeframe {
            Some(tf) => tf,
            None => {
                let tf = Timeframe::detect(&row.date)?;
                *timeframe = Some(tf);
                tf
            }
        };
        if i < skip {
            continue;
        }
        candles.push(row.into_candle(tf)?);
    }
    Ok(candles)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::DataFeed(format!("cannot read {}: {e}", path.display())))
}

/// Whole-file replay for backtests.
pub struct HistoricalFeed {
    candles: Vec<Candle>,
    current_index: usize,
    timeframe: Timeframe,
}

impl HistoricalFeed {
    /// Load every candle of a CSV file up front.
    ///
    /// # Errors
    ///
    /// `DataFeed` when the file is missing, has no data rows, or any row is
    /// malformed.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let bytes = read_file(path)?;
        let mut timeframe = None;
        let mut candles = parse_rows(&bytes, &mut timeframe, 0)?;
        let Some(timeframe) = timeframe else {
            return Err(Error::DataFeed(format!("{} contains no candles", path.display())));
        };
        candles.sort_by_key(|c| c.timestamp);
        info!(
            file = %path.display(),
            candles = candles.len(),
            timeframe = %timeframe,
            "Loaded historical data"
        );
        Ok(Self {
            candles,
            current_index: 0,
            timeframe,
        })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[async_trait]
impl CandleFeed for HistoricalFeed {
    async fn next_candle(&mut self) -> Result<Option<Candle>> {
        let candle = self.candles.get(self.current_index).copied();
        if candle.is_some() {
            self.current_index += 1;
        }
        Ok(candle)
    }
}

/// Follows a CSV file that another process keeps appending to.
///
/// Rows already present at start-up are delivered first. Only complete
/// (newline-terminated) lines are read. The feed closes when the file
/// disappears.
pub struct TailingFeed {
    path: PathBuf,
    poll: Duration,
    timeframe: Option<Timeframe>,
    rows_seen: usize,
    buffered: VecDeque<Candle>,
}

impl TailingFeed {
    pub fn open(path: &Path, poll: Duration) -> Result<Self> {
        let mut feed = Self {
            path: path.to_path_buf(),
            poll,
            timeframe: None,
            rows_seen: 0,
            buffered: VecDeque::new(),
        };
        let bytes = read_file(path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::DataFeed(format!("{} is empty", path.display())));
        }
        feed.ingest(&bytes)?;
        info!(
            file = %path.display(),
            backlog = feed.buffered.len(),
            poll_ms = poll.as_millis() as u64,
            "Tailing live data"
        );
        Ok(feed)
    }

    fn ingest(&mut self, bytes: &[u8]) -> Result<()> {
        let complete = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(end) => &bytes[..=end],
            None => return Ok(()),
        };
        let fresh = parse_rows(complete, &mut self.timeframe, self.rows_seen)?;
        self.rows_seen += fresh.len();
        self.buffered.extend(fresh);
        Ok(())
    }
}

#[async_trait]
impl CandleFeed for TailingFeed {
    async fn next_candle(&mut self) -> Result<Option<Candle>> {
        loop {
            if let Some(candle) = self.buffered.pop_front() {
                return Ok(Some(candle));
            }
            tokio::time::sleep(self.poll).await;
            match std::fs::read(&self.path) {
                Ok(bytes) => {
                    self.ingest(&bytes)?;
                    if !self.buffered.is_empty() {
                        debug!(new_rows = self.buffered.len(), "Live data appended");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(file = %self.path.display(), "Live data file removed, closing feed");
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::DataFeed(format!(
                        "cannot read {}: {e}",
                        self.path.display()
                    )))
                }
            }
        }
    }
}
