use crate::{error::CrawlError, transfer::queue::QueueSender};
use engine_core::metrics::TransferReport;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Walks a directory tree and feeds every regular file into the transfer queue.
pub struct DirectoryCrawler {
    report: TransferReport,
    stop: CancellationToken,
}

impl DirectoryCrawler {
    pub fn new(report: TransferReport) -> Self {
        Self {
            report,
            stop: CancellationToken::new(),
        }
    }

    /// Halts further descent. Items already queued still drain.
    pub fn stop(&self) {
        info!("Stopping crawler");
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Crawls `root` into `queue`. End-of-stream is signalled on every exit path.
    pub async fn crawl(&self, root: &Path, queue: &QueueSender) -> Result<(), CrawlError> {
        let result = self.walk(root, queue).await;
        queue.finish().await;

        match &result {
            Ok(()) => info!(
                root = %root.display(),
                found = self.report.found(),
                "Crawl finished"
            ),
            Err(e) => warn!(root = %root.display(), error = %e, "Crawl aborted"),
        }
        result
    }

    async fn walk(&self, root: &Path, queue: &QueueSender) -> Result<(), CrawlError> {
        let metadata = match fs::metadata(root).await {
            Ok(metadata) => metadata,
            Err(source) => {
                self.report.report_failure(root, source.to_string());
                return Err(CrawlError::RootInaccessible {
                    path: root.to_path_buf(),
                    source,
                });
            }
        };
        if !metadata.is_dir() {
            self.report.report_failure(root, "Not a directory");
            return Err(CrawlError::NotADirectory(root.to_path_buf()));
        }

        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            if self.is_stopped() {
                debug!(dir = %dir.display(), "Crawler stopped before descending");
                break;
            }

            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(source) if dir == root => {
                    self.report.report_failure(&dir, source.to_string());
                    return Err(CrawlError::RootInaccessible { path: dir, source });
                }
                Err(e) => {
                    self.report.report_failure(&dir, e.to_string());
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        self.report.report_failure(&dir, e.to_string());
                        break;
                    }
                };

                let path = entry.path();
                match self.classify(&path, &entry).await {
                    Some(EntryKind::Directory) => pending.push(path),
                    Some(EntryKind::File) => self.emit(path, queue).await?,
                    None => {}
                }
            }
        }

        Ok(())
    }

    async fn classify(&self, path: &Path, entry: &fs::DirEntry) -> Option<EntryKind> {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                self.report.report_failure(path, e.to_string());
                return None;
            }
        };

        if file_type.is_dir() {
            return Some(EntryKind::Directory);
        }
        if file_type.is_file() {
            return Some(EntryKind::File);
        }
        if file_type.is_symlink() {
            // Linked files are copied; linked directories are not followed.
            return match fs::metadata(path).await {
                Ok(target) if target.is_file() => Some(EntryKind::File),
                Ok(_) => {
                    debug!(path = %path.display(), "Skipping link to directory");
                    None
                }
                Err(e) => {
                    self.report.report_failure(path, e.to_string());
                    None
                }
            };
        }

        debug!(path = %path.display(), "Skipping special file");
        None
    }

    async fn emit(&self, path: PathBuf, queue: &QueueSender) -> Result<(), CrawlError> {
        self.report.increment_found();
        queue.put(path).await?;
        Ok(())
    }
}

enum EntryKind {
    Directory,
    File,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::queue;
    use std::collections::HashSet;

    async fn drain(rx: &mut queue::QueueReceiver) -> HashSet<PathBuf> {
        let mut items = HashSet::new();
        while let Some(item) = rx.take().await.unwrap() {
            items.insert(item);
        }
        items
    }

    #[tokio::test]
    async fn finds_files_in_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.txt"), "1").unwrap();
        std::fs::write(dir.path().join("a/mid.txt"), "2").unwrap();
        std::fs::write(dir.path().join("a/b/deep.txt"), "3").unwrap();

        let report = TransferReport::new();
        let crawler = DirectoryCrawler::new(report.clone());
        let (tx, mut rx) = queue::channel(16);

        crawler.crawl(dir.path(), &tx).await.unwrap();
        let items = drain(&mut rx).await;

        assert_eq!(report.found(), 3);
        assert_eq!(items.len(), 3);
        assert!(items.contains(&dir.path().join("a/b/deep.txt")));
    }

    #[tokio::test]
    async fn missing_root_fails_and_still_finishes_queue() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let report = TransferReport::new();
        let crawler = DirectoryCrawler::new(report.clone());
        let (tx, mut rx) = queue::channel(4);

        let err = crawler.crawl(&missing, &tx).await.unwrap_err();
        assert!(matches!(err, CrawlError::RootInaccessible { .. }));
        assert_eq!(report.found(), 0);
        assert!(report.has_failed(&missing));
        assert_eq!(rx.take().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stopped_crawler_does_not_descend() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();

        let report = TransferReport::new();
        let crawler = DirectoryCrawler::new(report.clone());
        crawler.stop();
        let (tx, mut rx) = queue::channel(4);

        crawler.crawl(dir.path(), &tx).await.unwrap();
        assert_eq!(report.found(), 0);
        assert_eq!(rx.take().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_subdirectory_is_reported_per_item() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("hidden.txt"), "x").unwrap();
        std::fs::write(dir.path().join("visible.txt"), "y").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not restrict root.
        if std::fs::read_dir(&locked).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let report = TransferReport::new();
        let crawler = DirectoryCrawler::new(report.clone());
        let (tx, mut rx) = queue::channel(4);
        crawler.crawl(dir.path(), &tx).await.unwrap();
        let items = drain(&mut rx).await;

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(items.len(), 1);
        assert!(report.has_failed(&locked));
    }
}
