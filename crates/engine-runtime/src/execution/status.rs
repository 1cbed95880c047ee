use model::{stage::MigrationStage, transfer::TransferReportSnapshot};
use serde::Serialize;

/// Point-in-time view of the migration, available at any stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub stage: MigrationStage,
    pub last_error: Option<String>,
    /// Report of the most recent filesystem upload, if one has been started.
    pub filesystem: Option<TransferReportSnapshot>,
    /// Report of the most recent database dump upload, if one has been started.
    pub database: Option<TransferReportSnapshot>,
}

impl MigrationStatus {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn failed_items(&self) -> usize {
        [&self.filesystem, &self.database]
            .into_iter()
            .flatten()
            .map(|report| report.failed.len())
            .sum()
    }
}
