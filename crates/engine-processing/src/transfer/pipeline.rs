use crate::{
    error::PipelineError,
    transfer::{
        crawler::DirectoryCrawler,
        queue,
        store::ObjectStore,
        uploader::{Uploader, UploaderConfig},
    },
};
use engine_core::metrics::TransferReport;
use model::transfer::TransferReportSnapshot;
use std::{path::Path, sync::Arc};
use tracing::{error, info};

/// Crawler and uploader running as two tasks over one bounded queue.
pub struct TransferPipeline {
    crawler: Arc<DirectoryCrawler>,
    uploader: Arc<Uploader>,
    report: TransferReport,
    capacity: usize,
}

impl TransferPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, config: UploaderConfig) -> Self {
        let report = TransferReport::new();
        let capacity = config.max_in_flight.max(1);
        Self {
            crawler: Arc::new(DirectoryCrawler::new(report.clone())),
            uploader: Arc::new(Uploader::new(store, config, report.clone())),
            report,
            capacity,
        }
    }

    pub fn report(&self) -> &TransferReport {
        &self.report
    }

    /// Stops the crawler; files already queued are still uploaded.
    pub fn stop(&self) {
        self.crawler.stop();
    }

    /// Copies every file under `root`, waiting for both tasks to finish.
    pub async fn transfer(&self, root: &Path) -> Result<TransferReportSnapshot, PipelineError> {
        info!(root = %root.display(), capacity = self.capacity, "Starting transfer");
        self.report.start();

        let (tx, mut rx) = queue::channel(self.capacity);

        let crawler = self.crawler.clone();
        let crawl_root = root.to_path_buf();
        let crawl_handle = tokio::spawn(async move { crawler.crawl(&crawl_root, &tx).await });

        let uploader = self.uploader.clone();
        let upload_root = root.to_path_buf();
        let upload_handle =
            tokio::spawn(async move { uploader.upload(&upload_root, &mut rx).await });

        // Both tasks always run to completion so each can clean up.
        let (crawl_result, upload_result) = tokio::join!(crawl_handle, upload_handle);

        let outcome = match (crawl_result, upload_result) {
            (Err(e), _) | (_, Err(e)) => Err(PipelineError::Task(e)),
            (Ok(Err(e)), _) => Err(PipelineError::Crawl(e)),
            (_, Ok(Err(e))) => Err(PipelineError::Upload(e)),
            (Ok(Ok(())), Ok(Ok(()))) => Ok(()),
        };

        match outcome {
            Ok(()) => {
                self.report.finish();
                let snapshot = self.report.snapshot();
                info!(
                    found = snapshot.found,
                    completed = snapshot.completed,
                    failed = snapshot.failed.len(),
                    "Transfer finished"
                );
                Ok(snapshot)
            }
            Err(e) => {
                error!(error = %e, "Transfer aborted");
                self.report.mark_failed();
                Err(e)
            }
        }
    }
}
