use chrono::{DateTime, Utc};
use model::transfer::{FailedTransfer, TransferReportSnapshot, TransferStatus};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::error;

#[derive(Debug, Default)]
struct Timeline {
    status: TransferStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct InnerReport {
    found: AtomicU64,
    commenced: AtomicU64,
    completed: AtomicU64,
    failed: Mutex<Vec<FailedTransfer>>,
    timeline: Mutex<Timeline>,
}

/// Progress of one transfer run, shared between the crawler and the uploader.
///
/// Counters only grow and failures are only appended, so a snapshot taken at
/// any point (even after the run failed) is a consistent lower bound.
#[derive(Debug, Clone)]
pub struct TransferReport {
    inner: Arc<InnerReport>,
}

impl TransferReport {
    pub fn new() -> Self {
        TransferReport {
            inner: Arc::new(InnerReport::default()),
        }
    }

    pub fn increment_found(&self) {
        self.inner.found.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_commenced(&self) {
        self.inner.commenced.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_completed(&self) {
        self.inner.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn report_failure(&self, path: impl Into<PathBuf>, reason: impl Into<String>) {
        let failure = FailedTransfer {
            path: path.into(),
            reason: reason.into(),
        };
        error!(path = %failure.path.display(), reason = %failure.reason, "Transfer failed");
        lock(&self.inner.failed).push(failure);
    }

    pub fn found(&self) -> u64 {
        self.inner.found.load(Ordering::SeqCst)
    }

    pub fn commenced(&self) -> u64 {
        self.inner.commenced.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> usize {
        lock(&self.inner.failed).len()
    }

    pub fn has_failed(&self, path: &Path) -> bool {
        lock(&self.inner.failed).iter().any(|f| f.path == path)
    }

    pub fn status(&self) -> TransferStatus {
        lock(&self.inner.timeline).status
    }

    pub fn start(&self) {
        let mut timeline = lock(&self.inner.timeline);
        timeline.status = TransferStatus::Running;
        timeline.started_at = Some(Utc::now());
        timeline.completed_at = None;
    }

    /// Marks the run `Done`, unless it was already marked `Failed`.
    pub fn finish(&self) {
        let mut timeline = lock(&self.inner.timeline);
        if timeline.status != TransferStatus::Failed {
            timeline.status = TransferStatus::Done;
        }
        timeline.completed_at.get_or_insert_with(Utc::now);
    }

    pub fn mark_failed(&self) {
        let mut timeline = lock(&self.inner.timeline);
        timeline.status = TransferStatus::Failed;
        timeline.completed_at.get_or_insert_with(Utc::now);
    }

    pub fn snapshot(&self) -> TransferReportSnapshot {
        let timeline = lock(&self.inner.timeline);
        TransferReportSnapshot {
            status: timeline.status,
            found: self.found(),
            commenced: self.commenced(),
            completed: self.completed(),
            failed: lock(&self.inner.failed).clone(),
            started_at: timeline.started_at,
            completed_at: timeline.completed_at,
        }
    }
}

impl Default for TransferReport {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
