use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    #[default]
    NotStarted,
    Running,
    Done,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::NotStarted => "NotStarted",
            TransferStatus::Running => "Running",
            TransferStatus::Done => "Done",
            TransferStatus::Failed => "Failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TransferStatus::Done | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single item that could not be transferred, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTransfer {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferReportSnapshot {
    pub status: TransferStatus,
    pub found: u64,
    pub commenced: u64,
    pub completed: u64,
    pub failed: Vec<FailedTransfer>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferReportSnapshot {
    /// Time between start and completion, or up to `now` while still running.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or(now);
        (end - start).to_std().ok()
    }

    /// Items that reached a terminal classification.
    pub fn resolved(&self) -> u64 {
        self.completed + self.failed.len() as u64
    }
}
