use crate::{error::StageError, migration_state::MigrationService};
use async_trait::async_trait;
use model::stage::MigrationStage;
use std::{fmt, sync::Arc};

/// Binds the lifecycle points of one phase to stage transitions.
#[async_trait]
pub trait StageTransitionCallback: Send + Sync {
    fn phase(&self) -> &'static str;

    /// Fails fast unless the migration is in the stage this phase starts from.
    async fn assert_in_starting_stage(&self) -> Result<(), StageError>;

    /// Called once the phase's operation has been durably started.
    async fn transition_to_wait_stage(&self) -> Result<(), StageError>;

    /// Called only after the phase's operation reported success.
    async fn transition_to_next_stage(&self) -> Result<(), StageError>;

    /// Called on any fatal failure, before the failure is re-raised.
    async fn transition_to_error_stage(
        &self,
        cause: &(dyn fmt::Display + Sync),
    ) -> Result<(), StageError>;
}

macro_rules! stage_callback {
    ($(#[$doc:meta])* $name:ident, $phase:literal, $start:ident => $wait:ident => $next:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            migration: Arc<MigrationService>,
        }

        impl $name {
            pub fn new(migration: Arc<MigrationService>) -> Self {
                Self { migration }
            }
        }

        #[async_trait]
        impl StageTransitionCallback for $name {
            fn phase(&self) -> &'static str {
                $phase
            }

            async fn assert_in_starting_stage(&self) -> Result<(), StageError> {
                self.migration
                    .assert_current_stage(MigrationStage::$start)
                    .await
            }

            async fn transition_to_wait_stage(&self) -> Result<(), StageError> {
                self.migration.transition(MigrationStage::$wait).await
            }

            async fn transition_to_next_stage(&self) -> Result<(), StageError> {
                self.migration.transition(MigrationStage::$next).await
            }

            async fn transition_to_error_stage(
                &self,
                cause: &(dyn fmt::Display + Sync),
            ) -> Result<(), StageError> {
                self.migration.error_with_cause(cause).await
            }
        }
    };
}

stage_callback!(
    /// Deploys the application stack.
    ApplicationProvisioningCallback,
    "application provisioning",
    ProvisionApplication => ProvisionApplicationWait => ProvisionMigrationStack
);

stage_callback!(
    /// Deploys the helper stack that hosts the migration tooling.
    MigrationStackProvisioningCallback,
    "migration stack provisioning",
    ProvisionMigrationStack => ProvisionMigrationStackWait => FsMigrationCopy
);

stage_callback!(
    FilesystemMigrationCallback,
    "filesystem migration",
    FsMigrationCopy => FsMigrationCopyWait => OfflineWarning
);

stage_callback!(
    DatabaseExportCallback,
    "database export",
    DbMigrationExport => DbMigrationExportWait => DbMigrationUpload
);

stage_callback!(
    DatabaseUploadCallback,
    "database upload",
    DbMigrationUpload => DbMigrationUploadWait => DataMigrationImport
);

stage_callback!(
    DatabaseRestoreCallback,
    "database restore",
    DataMigrationImport => DataMigrationImportWait => Validate
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::sled_store::SledMigrationStore;

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
    async fn filesystem_callback_brackets_copy_stages() {
        let service = service_at(MigrationStage::FsMigrationCopy).await;
        let callback = FilesystemMigrationCallback::new(service.clone());

        callback.assert_in_starting_stage().await.unwrap();
        callback.transition_to_wait_stage().await.unwrap();
        assert_eq!(
            service.current_stage().await.unwrap(),
            MigrationStage::FsMigrationCopyWait
        );
        callback.transition_to_next_stage().await.unwrap();
        assert_eq!(
            service.current_stage().await.unwrap(),
            MigrationStage::OfflineWarning
        );
    }

    #[tokio::test]
    async fn callback_rejects_wrong_starting_stage() {
        let service = service_at(MigrationStage::Authentication).await;
        let callback = DatabaseRestoreCallback::new(service.clone());

        assert!(matches!(
            callback.assert_in_starting_stage().await,
            Err(StageError::UnexpectedStage { .. })
        ));
        assert!(callback.transition_to_wait_stage().await.is_err());
    }

    #[tokio::test]
    async fn error_stage_records_cause() {
        let service = service_at(MigrationStage::DbMigrationExport).await;
        let callback = DatabaseExportCallback::new(service.clone());

        callback
            .transition_to_error_stage(&"pg_dump exited with 1")
            .await
            .unwrap();
        let snapshot = service.current_migration().await.unwrap();
        assert_eq!(snapshot.stage, MigrationStage::Error);
        assert_eq!(snapshot.last_error.as_deref(), Some("pg_dump exited with 1"));
    }
}
