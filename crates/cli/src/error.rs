use engine_config::settings::error::SettingsError;
use engine_core::error::{StageError, StoreError};
use engine_processing::error::PipelineError;
use engine_runtime::error::ExtractError;
use model::stage::ParseStageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to open the migration state store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    InvalidStage(#[from] ParseStageError),

    #[error("Copy failed: {0}")]
    Transfer(#[from] PipelineError),

    #[error("Database export failed: {0}")]
    Export(#[from] ExtractError),

    #[error("Setting '{0}' is required for this command")]
    MissingSetting(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
