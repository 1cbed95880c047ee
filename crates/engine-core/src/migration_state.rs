use crate::{error::StageError, state::MigrationStore};
use chrono::Utc;
use model::{
    migration::{Migration, MigrationContext, MigrationSnapshot},
    stage::MigrationStage,
};
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionMode {
    /// A transition must start from the target's declared predecessor.
    Enforced,
    /// Any transition is accepted. Operational overrides only.
    AllowAny,
}

/// The stage state machine for the singleton migration.
///
/// All writes to the migration record go through one async mutex, so two
/// phases can never both observe the same predecessor and advance from it.
pub struct MigrationService {
    store: Arc<dyn MigrationStore>,
    mode: TransitionMode,
    lock: Mutex<()>,
}

impl MigrationService {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self {
            store,
            mode: TransitionMode::Enforced,
            lock: Mutex::new(()),
        }
    }

    /// Permissive variant that skips predecessor validation.
    pub fn allow_any_transition(store: Arc<dyn MigrationStore>) -> Self {
        warn!("Stage transitions are not validated in this mode");
        Self {
            store,
            mode: TransitionMode::AllowAny,
            lock: Mutex::new(()),
        }
    }

    /// Returns the migration if it has not been started yet.
    pub async fn create_migration(&self) -> Result<MigrationSnapshot, StageError> {
        let _guard = self.lock.lock().await;
        let migration = self.store.find_or_create_migration().await?;
        if migration.stage != MigrationStage::NotStarted {
            return Err(StageError::MigrationAlreadyExists {
                stage: migration.stage,
            });
        }
        Ok(migration.snapshot())
    }

    pub async fn current_stage(&self) -> Result<MigrationStage, StageError> {
        Ok(self.store.find_or_create_migration().await?.stage)
    }

    pub async fn current_migration(&self) -> Result<MigrationSnapshot, StageError> {
        Ok(self.store.find_or_create_migration().await?.snapshot())
    }

    pub async fn assert_current_stage(&self, expected: MigrationStage) -> Result<(), StageError> {
        let actual = self.current_stage().await?;
        if actual != expected {
            return Err(StageError::UnexpectedStage { expected, actual });
        }
        Ok(())
    }

    pub async fn current_context(&self) -> Result<MigrationContext, StageError> {
        let migration = self.store.find_or_create_migration().await?;
        Ok(self.store.load_context(migration.id).await?)
    }

    /// Applies `update` to the current context and persists it.
    pub async fn update_context<F>(&self, update: F) -> Result<MigrationContext, StageError>
    where
        F: FnOnce(&mut MigrationContext) + Send,
    {
        let _guard = self.lock.lock().await;
        let migration = self.store.find_or_create_migration().await?;
        let mut context = self.store.load_context(migration.id).await?;
        update(&mut context);
        context.migration_id = migration.id;
        self.store.save_context(&context).await?;
        Ok(context)
    }

    pub async fn transition(&self, to: MigrationStage) -> Result<(), StageError> {
        let _guard = self.lock.lock().await;
        let mut migration = self.store.find_or_create_migration().await?;
        let from = migration.stage;

        if self.mode == TransitionMode::Enforced && !from.is_valid_transition(to) {
            warn!(%from, %to, "Rejected stage transition");
            return Err(StageError::InvalidStageTransition { from, to });
        }

        migration.stage = to;
        if to != MigrationStage::Error {
            migration.last_error = None;
        }
        migration.updated_at = Utc::now();
        self.store.save_migration(&migration).await?;

        info!(%from, %to, migration_id = migration.id, "Migration stage transition");
        Ok(())
    }

    /// Unconditionally moves the migration to `Error`.
    pub async fn error(&self) -> Result<(), StageError> {
        self.record_error(None).await
    }

    /// Moves the migration to `Error` and records `cause` for diagnostics.
    pub async fn error_with_cause(&self, cause: &(dyn fmt::Display + Sync)) -> Result<(), StageError> {
        self.record_error(Some(cause.to_string())).await
    }

    /// Moves the migration to `Error` only if `check` accepts the current stage.
    ///
    /// The check and the write happen under the same lock, so no transition can
    /// slip in between them. Returns the stage the migration was in.
    pub async fn error_when<F>(
        &self,
        check: F,
        cause: &(dyn fmt::Display + Sync),
    ) -> Result<MigrationStage, StageError>
    where
        F: FnOnce(MigrationStage) -> Result<(), StageError> + Send,
    {
        let _guard = self.lock.lock().await;
        let migration = self.store.find_or_create_migration().await?;
        let from = migration.stage;
        check(from)?;
        self.write_error(migration, Some(cause.to_string())).await?;
        Ok(from)
    }

    /// [`error_when`](Self::error_when) for a single expected stage.
    pub async fn error_if_in(
        &self,
        expected: MigrationStage,
        cause: &(dyn fmt::Display + Sync),
    ) -> Result<(), StageError> {
        self.error_when(
            |actual| {
                if actual == expected {
                    Ok(())
                } else {
                    Err(StageError::UnexpectedStage { expected, actual })
                }
            },
            cause,
        )
        .await
        .map(|_| ())
    }

    async fn record_error(&self, cause: Option<String>) -> Result<(), StageError> {
        let _guard = self.lock.lock().await;
        let migration = self.store.find_or_create_migration().await?;
        self.write_error(migration, cause).await
    }

    async fn write_error(
        &self,
        mut migration: Migration,
        cause: Option<String>,
    ) -> Result<(), StageError> {
        let from = migration.stage;

        migration.stage = MigrationStage::Error;
        if cause.is_some() {
            migration.last_error = cause;
        }
        migration.updated_at = Utc::now();
        self.store.save_migration(&migration).await?;

        error!(
            %from,
            migration_id = migration.id,
            cause = migration.last_error.as_deref().unwrap_or("unknown"),
            "Migration moved to error stage"
        );
        Ok(())
    }

    /// Administrative reset: removes the migration and its context.
    pub async fn delete_migrations(&self) -> Result<usize, StageError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.delete_all().await?)
    }
}
