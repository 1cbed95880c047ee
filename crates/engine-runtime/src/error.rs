use engine_config::settings::error::SettingsError;
use engine_core::error::{StageError, StoreError};
use engine_processing::error::{OperationError, PipelineError};
use std::path::PathBuf;
use thiserror::Error;

/// A failure that ends one migration phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Transfer failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Database export failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Migration context has no {0}; has the previous phase completed?")]
    MissingContext(&'static str),

    #[error("Setting {0} is required for this phase")]
    MissingSetting(&'static str),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{failed} of {found} dump files could not be uploaded")]
    IncompleteUpload { found: u64, failed: usize },

    #[error("Phase was aborted")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to prepare dump directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No runner registered under '{0}'")]
    UnknownRunner(String),

    #[error("Job '{0}' is already scheduled")]
    AlreadyScheduled(String),
}

/// Top-level errors for the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Phase failed: {0}")]
    Phase(#[from] PhaseError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}
