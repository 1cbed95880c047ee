use model::stage::MigrationStage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to encode or decode a stored record: {0}")]
    Codec(#[from] bincode::Error),

    /// More than one migration record exists. Never repaired automatically.
    #[error("Invalid state: expected exactly one migration, found {count}")]
    ConsistencyViolation { count: usize },
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidStageTransition {
        from: MigrationStage,
        to: MigrationStage,
    },

    #[error("Wanted to be in stage {expected} but was in stage {actual}")]
    UnexpectedStage {
        expected: MigrationStage,
        actual: MigrationStage,
    },

    #[error("Expected a {phase} stage but was in stage {actual}")]
    NotInPhase {
        phase: &'static str,
        actual: MigrationStage,
    },

    #[error("Found existing migration in stage {stage}")]
    MigrationAlreadyExists { stage: MigrationStage },

    #[error(transparent)]
    Store(#[from] StoreError),
}
