use crate::{
    error::{MigrationError, SchedulerError},
    execution::orchestrator::Orchestrator,
    scheduler::{JobFuture, JobRunner, JobScheduler},
};
use engine_core::migration_state::MigrationService;
use std::sync::Arc;
use tracing::{error, info};

pub const FILESYSTEM_MIGRATION_JOB: &str = "filesystem-migration-";
pub const DATABASE_MIGRATION_JOB: &str = "database-migration-";

/// Schedules migration phases so each runs at most once per migration.
pub struct MigrationRunner {
    scheduler: Arc<dyn JobScheduler>,
    migration: Arc<MigrationService>,
}

impl MigrationRunner {
    pub fn new(scheduler: Arc<dyn JobScheduler>, migration: Arc<MigrationService>) -> Self {
        Self {
            scheduler,
            migration,
        }
    }

    /// Registers the phase jobs backed by `orchestrator`.
    pub async fn register_phases(&self, orchestrator: Arc<Orchestrator>) {
        self.scheduler
            .register_runner(
                FILESYSTEM_MIGRATION_JOB,
                Arc::new(FilesystemMigrationJob(orchestrator.clone())),
            )
            .await;
        self.scheduler
            .register_runner(
                DATABASE_MIGRATION_JOB,
                Arc::new(DatabaseMigrationJob(orchestrator)),
            )
            .await;
    }

    pub async fn job_id(&self, runner_key: &str) -> Result<String, MigrationError> {
        let migration = self.migration.current_migration().await?;
        Ok(format!("{runner_key}{}", migration.id))
    }

    /// Schedules the job for the current migration. Returns `false` when it is already scheduled.
    ///
    /// A scheduling failure moves the migration to `Error`.
    pub async fn run_migration(&self, runner_key: &str) -> Result<bool, MigrationError> {
        let job_id = self.job_id(runner_key).await?;
        if self.scheduler.job_exists(&job_id).await {
            info!(job = %job_id, "Migration job is already scheduled");
            return Ok(false);
        }

        match self.scheduler.schedule_once(&job_id, runner_key).await {
            Ok(()) => Ok(true),
            Err(SchedulerError::AlreadyScheduled(_)) => Ok(false),
            Err(e) => {
                error!(job = %job_id, error = %e, "Failed to schedule migration job");
                self.migration.error_with_cause(&e).await?;
                self.scheduler.unschedule(&job_id).await;
                Err(e.into())
            }
        }
    }

    /// Removes the job for the current migration. Returns whether one was scheduled.
    pub async fn abort_migration(&self, runner_key: &str) -> Result<bool, MigrationError> {
        let job_id = self.job_id(runner_key).await?;
        Ok(self.scheduler.unschedule(&job_id).await)
    }

    /// Stops the running filesystem migration and forgets its job.
    pub async fn abort_filesystem_migration(
        &self,
        orchestrator: &Orchestrator,
    ) -> Result<(), MigrationError> {
        orchestrator.abort_filesystem_migration().await?;
        self.abort_migration(FILESYSTEM_MIGRATION_JOB).await?;
        Ok(())
    }

    pub async fn abort_database_migration(
        &self,
        orchestrator: &Orchestrator,
    ) -> Result<(), MigrationError> {
        orchestrator.abort_database_migration().await?;
        self.abort_migration(DATABASE_MIGRATION_JOB).await?;
        Ok(())
    }
}

struct FilesystemMigrationJob(Arc<Orchestrator>);

impl JobRunner for FilesystemMigrationJob {
    fn run(&self) -> JobFuture {
        let orchestrator = self.0.clone();
        Box::pin(async move {
            let report = orchestrator.migrate_filesystem().await?;
            info!(
                found = report.found,
                completed = report.completed,
                failed = report.failed.len(),
                "Filesystem migration job finished"
            );
            Ok(())
        })
    }
}

struct DatabaseMigrationJob(Arc<Orchestrator>);

impl JobRunner for DatabaseMigrationJob {
    fn run(&self) -> JobFuture {
        let orchestrator = self.0.clone();
        Box::pin(async move {
            orchestrator.migrate_database().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;
    use engine_core::state::sled_store::SledMigrationStore;
    use model::stage::MigrationStage;

    struct Idle;

    impl JobRunner for Idle {
        fn run(&self) -> JobFuture {
            Box::pin(futures::future::pending())
        }
    }

    fn runner() -> (MigrationRunner, Arc<MigrationService>, Arc<LocalScheduler>) {
        let migration = Arc::new(MigrationService::new(Arc::new(
            SledMigrationStore::temporary().unwrap(),
        )));
        let scheduler = Arc::new(LocalScheduler::new());
        (
            MigrationRunner::new(scheduler.clone(), migration.clone()),
            migration,
            scheduler,
        )
    }

    #[tokio::test]
    async fn job_is_scheduled_once_per_migration() {
        let (runner, migration, scheduler) = runner();
        scheduler.register_runner("idle-", Arc::new(Idle)).await;

        assert!(runner.run_migration("idle-").await.unwrap());
        assert!(!runner.run_migration("idle-").await.unwrap());

        let id = migration.current_migration().await.unwrap().id;
        assert!(scheduler.job_exists(&format!("idle-{id}")).await);

        assert!(runner.abort_migration("idle-").await.unwrap());
        assert!(!runner.abort_migration("idle-").await.unwrap());
    }

    #[tokio::test]
    async fn scheduling_failure_moves_migration_to_error() {
        let (runner, migration, _scheduler) = runner();

        let err = runner.run_migration("unregistered-").await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Scheduler(SchedulerError::UnknownRunner(_))
        ));

        let snapshot = migration.current_migration().await.unwrap();
        assert_eq!(snapshot.stage, MigrationStage::Error);
        assert!(snapshot.last_error.unwrap().contains("unregistered-"));
    }
}
