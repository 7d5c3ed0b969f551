use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::ShareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "Send"),
            Direction::Receive => write!(f, "Receive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Completed,
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Completed => write!(f, "Completed"),
            TransferStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of one session, as shown in the history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub direction: Direction,
    pub filename: String,
    /// Declared plaintext size in bytes
    pub size: u64,
    pub peer: String,
    pub timestamp: DateTime<Utc>,
    pub status: TransferStatus,
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn new(
        direction: Direction,
        filename: impl Into<String>,
        size: u64,
        peer: impl Into<String>,
        status: TransferStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            direction,
            filename: filename.into(),
            size,
            peer: peer.into(),
            timestamp: Utc::now(),
            status,
            error,
        }
    }

    /// One table row: date, type, file, size, status.
    pub fn table_row(&self) -> String {
        format!(
            "{:<19}  {:<7}  {:<32}  {:>10}  {}",
            self.timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            self.direction,
            self.filename,
            format_megabytes(self.size),
            self.status,
        )
    }
}

/// Size in megabytes with one decimal, e.g. `1.5 MB`.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Persistent history store backed by a JSON file.
///
/// Stores transfer history in `history.json` within the data directory.
/// Entries are capped at a configurable limit; oldest entries are removed
/// when the limit is exceeded.
///
/// An exclusive advisory lock on `history.lock` is held for the entire
/// lifetime of this struct and released automatically on drop, preventing
/// concurrent writers from corrupting the history file. Callers keep the
/// store open only as long as one read or append takes.
pub struct HistoryStore {
    path: PathBuf,
    entries: Vec<HistoryRecord>,
    limit: usize,
    /// Holds the open lock file. The `fs2` exclusive lock is tied to the file
    /// descriptor; dropping this field releases the lock.
    _lock_file: File,
}

impl HistoryStore {
    /// Load history from `data_dir/history.json`.
    ///
    /// Blocks until the exclusive lock on `data_dir/history.lock` is free.
    /// A missing file yields an empty history; a corrupted one logs a
    /// warning and starts fresh.
    pub fn load(data_dir: &Path, limit: usize) -> Result<Self, ShareError> {
        let lock_path = data_dir.join("history.lock");
        let lock_file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ShareError::fs(&lock_path, e))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| ShareError::fs(&lock_path, e))?;

        let path = data_dir.join("history.json");
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| ShareError::fs(&path, e))?;
            match serde_json::from_str::<Vec<HistoryRecord>>(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Corrupted history.json, starting fresh: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            entries,
            limit,
            _lock_file: lock_file,
        })
    }

    /// Append a new entry, truncating oldest if over limit, and save.
    pub fn append(&mut self, entry: HistoryRecord) -> Result<(), ShareError> {
        self.entries.push(entry);

        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }

        self.save()
    }

    /// All entries, oldest first.
    pub fn list(&self) -> &[HistoryRecord] {
        &self.entries
    }

    /// The newest `count` entries, newest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &HistoryRecord> {
        self.entries.iter().rev().take(count)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Save history to disk atomically (write temp, rename).
    pub fn save(&self) -> Result<(), ShareError> {
        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&tmp_path, json).map_err(|e| ShareError::fs(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| ShareError::fs(&self.path, e))?;
        Ok(())
    }
}
