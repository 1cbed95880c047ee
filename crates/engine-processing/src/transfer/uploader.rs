use crate::{
    error::{ObjectStoreError, UploadError},
    transfer::{
        multipart::upload_multipart,
        queue::QueueReceiver,
        store::{ObjectStore, PutResult},
    },
};
use engine_core::{
    metrics::TransferReport,
    retry::{RetryDisposition, RetryPolicy},
};
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub bucket: String,
    /// Ceiling on unresolved writes; also the transfer queue capacity.
    pub max_in_flight: usize,
    /// Files strictly larger than this go through the multipart path.
    pub multipart_threshold: u64,
    pub part_size: u64,
    pub retry: RetryPolicy,
    /// Prepended to every key, e.g. `db.dump` puts `toc.dat` at `db.dump/toc.dat`.
    pub key_prefix: Option<String>,
}

impl UploaderConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            max_in_flight: 50,
            multipart_threshold: 5 * 1024 * 1024 * 1024,
            part_size: 100 * 1024 * 1024,
            retry: RetryPolicy::for_remote_calls(),
            key_prefix: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Object key for `path`, a file found under `root`.
    pub fn key_for(&self, root: &Path, path: &Path) -> String {
        let key = object_key(root, path);
        match self.key_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}"),
            _ => key,
        }
    }
}

/// An object write that has been dispatched but whose result has not been observed.
struct PendingUpload {
    path: PathBuf,
    handle: JoinHandle<Result<PutResult, ObjectStoreError>>,
}

/// Drains the transfer queue into the object store.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    config: UploaderConfig,
    report: TransferReport,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, config: UploaderConfig, report: TransferReport) -> Self {
        Self {
            store,
            config,
            report,
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Uploads every queued file, keyed by its path relative to `root`.
    ///
    /// Only a broken queue is an error; per-file failures land in the report.
    pub async fn upload(&self, root: &Path, queue: &mut QueueReceiver) -> Result<(), UploadError> {
        let ceiling = self.config.max_in_flight.max(1);
        let mut pending = VecDeque::with_capacity(ceiling);

        loop {
            let path = match queue.take().await {
                Ok(Some(path)) => path,
                Ok(None) => break,
                Err(e) => {
                    self.resolve_all(&mut pending).await;
                    return Err(e.into());
                }
            };

            if let Some(upload) = self.dispatch(root, path).await {
                pending.push_back(upload);
            }
            if pending.len() >= ceiling {
                debug!(in_flight = pending.len(), "In-flight ceiling reached, resolving uploads");
                self.resolve_all(&mut pending).await;
            }
        }

        self.resolve_all(&mut pending).await;
        info!(
            completed = self.report.completed(),
            failed = self.report.failed_count(),
            "Upload finished"
        );
        Ok(())
    }

    async fn dispatch(&self, root: &Path, path: PathBuf) -> Option<PendingUpload> {
        let size = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => {
                let reason = format!("File doesn't exist: {}", path.display());
                self.report.report_failure(path, reason);
                return None;
            }
        };

        let key = self.config.key_for(root, &path);
        self.report.increment_commenced();

        let store = self.store.clone();
        let config = self.config.clone();
        let source = path.clone();
        let handle = tokio::spawn(async move {
            let classify = |e: &ObjectStoreError| {
                if e.is_transient() {
                    RetryDisposition::Retry
                } else {
                    RetryDisposition::Stop
                }
            };

            let (store, config, key, source) = (&store, &config, &key, &source);
            config
                .retry
                .run(
                    move || async move {
                        if size > config.multipart_threshold {
                            upload_multipart(
                                store.as_ref(),
                                &config.bucket,
                                key,
                                source,
                                config.part_size,
                            )
                            .await
                        } else {
                            store.put_object(&config.bucket, key, source).await
                        }
                    },
                    classify,
                )
                .await
                .map_err(|e| e.into_inner())
        });

        Some(PendingUpload { path, handle })
    }

    async fn resolve_all(&self, pending: &mut VecDeque<PendingUpload>) {
        while let Some(upload) = pending.pop_front() {
            match upload.handle.await {
                Ok(Ok(result)) if result.success => self.report.increment_completed(),
                Ok(Ok(result)) => self.report.report_failure(upload.path, result.status_text),
                Ok(Err(e)) => self.report.report_failure(upload.path, e.to_string()),
                Err(e) => self.report.report_failure(upload.path, e.to_string()),
            }
        }
    }
}

/// Object key for `path`: its location relative to `root`, `/`-separated.
pub fn object_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
