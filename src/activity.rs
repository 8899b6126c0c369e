//! Append-only operational activity log
//!
//! Every workspace-level event lands here twice: once in a bounded in-memory
//! buffer (the 100 most recent records, newest first) for cheap status reads,
//! and once in a durable JSONL file for history. Pagination walks the file
//! backward from the tail using the ISO-8601 timestamp as an opaque cursor.
//!
//! Recording never fails the caller: a write error to the durable file is
//! logged and swallowed, because the activity log must not take down the
//! operation it is describing.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Result;

/// Records kept in memory for immediate reads
const MEMORY_CAP: usize = 100;

/// Default page size for backward pagination
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Severity of an activity record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityLevel::Info => write!(f, "info"),
            ActivityLevel::Warn => write!(f, "warn"),
            ActivityLevel::Error => write!(f, "error"),
        }
    }
}

/// One operational log line
///
/// The timestamp doubles as the pagination cursor; RFC 3339 strings sort
/// lexicographically in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: String,
    pub level: ActivityLevel,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// Bounded in-memory buffer plus durable JSONL history
pub struct ActivityLog {
    buffer: RwLock<VecDeque<ActivityRecord>>,
    log_file: PathBuf,
}

impl ActivityLog {
    /// Open the log, loading the most recent records from the durable file.
    ///
    /// Corrupt lines are skipped; a missing file means a fresh log.
    pub async fn open(log_file: &Path) -> Result<Self> {
        if let Some(parent) = log_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut buffer = VecDeque::with_capacity(MEMORY_CAP);
        if let Ok(data) = tokio::fs::read_to_string(log_file).await {
            for line in data.lines().rev() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ActivityRecord>(line) {
                    Ok(record) => {
                        buffer.push_back(record);
                        if buffer.len() >= MEMORY_CAP {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping corrupt activity line"),
                }
            }
        }

        Ok(Self {
            buffer: RwLock::new(buffer),
            log_file: log_file.to_path_buf(),
        })
    }

    /// Append a record: newest-first buffer, durable file, tracing event
    pub async fn record(&self, level: ActivityLevel, message: &str, data: Value) {
        let record = ActivityRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
            data,
        };

        match level {
            ActivityLevel::Info => tracing::info!(data = %record.data, "{message}"),
            ActivityLevel::Warn => tracing::warn!(data = %record.data, "{message}"),
            ActivityLevel::Error => tracing::error!(data = %record.data, "{message}"),
        }

        {
            let mut buffer = self.buffer.write().await;
            buffer.push_front(record.clone());
            buffer.truncate(MEMORY_CAP);
        }

        if let Err(e) = self.persist(&record).await {
            warn!(error = %e, "Failed to persist activity record");
        }
    }

    async fn persist(&self, record: &ActivityRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// The in-memory buffer, newest first
    pub async fn recent(&self) -> Vec<ActivityRecord> {
        self.buffer.read().await.iter().cloned().collect()
    }

    /// Records strictly older than `before`, newest first, up to `limit`.
    ///
    /// With no cursor this returns the newest `limit` records from the
    /// durable file. The whole file is read, then walked backward from the
    /// tail; parsing stops once the page is full.
    pub async fn older_than(&self, before: Option<&str>, limit: usize) -> Vec<ActivityRecord> {
        let data = match tokio::fs::read_to_string(&self.log_file).await {
            Ok(data) => data,
            Err(_) => return Vec::new(),
        };

        let mut records = Vec::with_capacity(limit.min(MEMORY_CAP));
        for line in data.lines().rev() {
            if records.len() >= limit {
                break;
            }
            let record: ActivityRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(_) => continue,
            };
            match before {
                Some(cursor) if record.timestamp.as_str() >= cursor => continue,
                _ => records.push(record),
            }
        }
        records
    }
}
