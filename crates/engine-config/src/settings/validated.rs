use std::{path::PathBuf, time::Duration};

/// Immutable, validated configuration used throughout the migration.
#[derive(Debug, Clone)]
pub struct ValidatedSettings {
    /// Directory tree copied by the filesystem phase
    pub shared_home: Option<PathBuf>,
    /// Bucket override; otherwise taken from the migration stack outputs
    pub bucket: Option<String>,
    /// Where the migration record is persisted
    pub state_dir: PathBuf,
    /// Where the database dump is written before upload
    pub dump_dir: PathBuf,
    pub application_template_url: Option<String>,
    pub migration_template_url: Option<String>,
    /// Migration host override; otherwise taken from the migration stack outputs
    pub instance_id: Option<String>,
    pub database_url: Option<String>,

    pub max_concurrent_uploads: usize,
    pub multipart_threshold_bytes: u64,
    pub multipart_part_size_bytes: u64,

    pub stack_poll_interval: Duration,
    pub stack_timeout: Duration,
    pub command_poll_attempts: usize,
    pub command_poll_interval: Duration,
    pub command_timeout: Duration,
    pub fs_download_poll_interval: Duration,
    pub fs_download_timeout: Duration,
}

impl ValidatedSettings {
    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_concurrent_uploads
    }

    pub fn multipart_threshold_bytes(&self) -> u64 {
        self.multipart_threshold_bytes
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }
}
