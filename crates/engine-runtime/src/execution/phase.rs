use crate::error::PhaseError;
use engine_core::{
    callback::StageTransitionCallback, error::StageError, migration_state::MigrationService,
};
use model::stage::MigrationStage;
use std::future::Future;
use tracing::{error, info, warn};

/// Brackets one phase with its stage transitions.
///
/// `start` runs in the phase's starting stage and yields whatever the wait step
/// needs (a command id, a stack id, or nothing). The migration moves to the wait
/// stage only once `start` has succeeded, and to the next stage only once `wait`
/// has. Any failure after the starting-stage check moves the migration to
/// `Error` exactly once and is then returned unchanged. The one exception is a
/// rejected move into the wait stage: a concurrent run of the same phase got
/// there first, and the migration belongs to that run.
pub async fn run_phase<C, H, T, S, W, WF>(
    callback: &C,
    migration: &MigrationService,
    start: S,
    wait: W,
) -> Result<T, PhaseError>
where
    C: StageTransitionCallback + ?Sized,
    S: Future<Output = Result<H, PhaseError>>,
    W: FnOnce(H) -> WF,
    WF: Future<Output = Result<T, PhaseError>>,
{
    callback.assert_in_starting_stage().await?;
    info!(phase = callback.phase(), "Phase started");

    let handle = match start.await {
        Ok(handle) => handle,
        Err(e) => return Err(fail(callback, migration, e).await),
    };

    match callback.transition_to_wait_stage().await {
        Ok(()) => {}
        Err(e @ StageError::InvalidStageTransition { .. }) => {
            warn!(phase = callback.phase(), error = %e, "Phase is already running elsewhere");
            return Err(e.into());
        }
        Err(e) => return Err(fail(callback, migration, e.into()).await),
    }

    let outcome = async {
        let output = wait(handle).await?;
        callback.transition_to_next_stage().await?;
        Ok::<T, PhaseError>(output)
    }
    .await;

    match outcome {
        Ok(output) => {
            info!(phase = callback.phase(), "Phase completed");
            Ok(output)
        }
        Err(e) => Err(fail(callback, migration, e).await),
    }
}

async fn fail<C>(callback: &C, migration: &MigrationService, cause: PhaseError) -> PhaseError
where
    C: StageTransitionCallback + ?Sized,
{
    route_to_error(callback, migration, &cause).await;
    cause
}

async fn route_to_error<C>(callback: &C, migration: &MigrationService, cause: &PhaseError)
where
    C: StageTransitionCallback + ?Sized,
{
    // An abort has already moved the migration to Error and recorded its cause.
    if let Ok(MigrationStage::Error) = migration.current_stage().await {
        warn!(phase = callback.phase(), error = %cause, "Phase ended after the migration was already in error");
        return;
    }

    error!(phase = callback.phase(), error = %cause, "Phase failed");
    if let Err(e) = callback.transition_to_error_stage(cause).await {
        error!(phase = callback.phase(), error = %e, "Could not move migration to the error stage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{callback::FilesystemMigrationCallback, state::sled_store::SledMigrationStore};
    use std::sync::Arc;

    async fn service_at(stage: MigrationStage) -> Arc<MigrationService> {
        let service = MigrationService::new(Arc::new(SledMigrationStore::temporary().unwrap()));
        let mut current = MigrationStage::NotStarted;
        while current != stage {
            current = current.successor().unwrap();
            service.transition(current).await.unwrap();
        }
        Arc::new(service)
    }

    #[tokio::test]
    async fn success_walks_start_wait_next() {
        let service = service_at(MigrationStage::FsMigrationCopy).await;
        let callback = FilesystemMigrationCallback::new(service.clone());

        let observed = run_phase(
            &callback,
            &service,
            async { Ok::<_, PhaseError>(7) },
            |handle| {
                let service = service.clone();
                async move {
                    let stage = service.current_stage().await?;
                    Ok::<_, PhaseError>((handle, stage))
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(observed, (7, MigrationStage::FsMigrationCopyWait));
        assert_eq!(
            service.current_stage().await.unwrap(),
            MigrationStage::OfflineWarning
        );
    }

    #[tokio::test]
    async fn failed_start_never_reaches_wait_stage() {
        let service = service_at(MigrationStage::FsMigrationCopy).await;
        let callback = FilesystemMigrationCallback::new(service.clone());

        let result: Result<(), _> = run_phase(
            &callback,
            &service,
            async { Err::<(), _>(PhaseError::MissingContext("migration bucket")) },
            |_| async { Ok::<_, PhaseError>(()) },
        )
        .await;

        assert!(matches!(result, Err(PhaseError::MissingContext(_))));
        let snapshot = service.current_migration().await.unwrap();
        assert_eq!(snapshot.stage, MigrationStage::Error);
        assert!(snapshot.last_error.unwrap().contains("migration bucket"));
    }

    #[tokio::test]
    async fn wrong_starting_stage_is_not_routed_to_error() {
        let service = service_at(MigrationStage::OfflineWarning).await;
        let callback = FilesystemMigrationCallback::new(service.clone());

        let result: Result<(), _> = run_phase(
            &callback,
            &service,
            async { Ok::<_, PhaseError>(()) },
            |_| async { Ok::<_, PhaseError>(()) },
        )
        .await;

        assert!(matches!(
            result,
            Err(PhaseError::Stage(StageError::UnexpectedStage { .. }))
        ));
        assert_eq!(
            service.current_stage().await.unwrap(),
            MigrationStage::OfflineWarning
        );
    }

    #[tokio::test]
    async fn losing_the_race_to_the_wait_stage_leaves_the_winner_running() {
        let service = service_at(MigrationStage::FsMigrationCopy).await;
        let callback = FilesystemMigrationCallback::new(service.clone());
        let winner = FilesystemMigrationCallback::new(service.clone());

        let result: Result<(), _> = run_phase(
            &callback,
            &service,
            async {
                // The other run passes the same starting-stage check and moves first.
                winner.transition_to_wait_stage().await?;
                Ok::<_, PhaseError>(())
            },
            |_| async { Ok::<_, PhaseError>(()) },
        )
        .await;

        assert!(matches!(
            result,
            Err(PhaseError::Stage(StageError::InvalidStageTransition {
                from: MigrationStage::FsMigrationCopyWait,
                to: MigrationStage::FsMigrationCopyWait,
            }))
        ));
        let snapshot = service.current_migration().await.unwrap();
        assert_eq!(snapshot.stage, MigrationStage::FsMigrationCopyWait);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn existing_error_cause_is_kept() {
        let service = service_at(MigrationStage::FsMigrationCopy).await;
        let callback = FilesystemMigrationCallback::new(service.clone());

        let result: Result<(), _> = run_phase(
            &callback,
            &service,
            async { Ok::<_, PhaseError>(()) },
            |_| {
                let service = service.clone();
                async move {
                    service.error_with_cause(&"aborted by operator").await?;
                    Err::<(), _>(PhaseError::Aborted)
                }
            },
        )
        .await;

        assert!(matches!(result, Err(PhaseError::Aborted)));
        let snapshot = service.current_migration().await.unwrap();
        assert_eq!(snapshot.stage, MigrationStage::Error);
        assert_eq!(snapshot.last_error.as_deref(), Some("aborted by operator"));
    }
}
