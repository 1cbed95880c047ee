use crate::{
    error::PhaseError,
    execution::{download::DownloadProgress, phase::run_phase, status::MigrationStatus},
    extract::{DUMP_DIR_NAME, DatabaseExtractor},
};
use engine_config::settings::validated::ValidatedSettings;
use engine_core::{
    callback::{
        ApplicationProvisioningCallback, DatabaseExportCallback, DatabaseRestoreCallback,
        DatabaseUploadCallback, FilesystemMigrationCallback, MigrationStackProvisioningCallback,
    },
    error::StageError,
    migration_state::MigrationService,
};
use engine_processing::{
    remote::{
        command::{CommandExecutor, EnsureSuccess, ParseJson, RemoteCommand},
        poller::{PollStrategy, Poller, RemoteOperation},
        stack::{DeployedStack, HelperStackOutputs, StackDeployment, StackProvisioner, helper_stack_name},
    },
    transfer::{pipeline::TransferPipeline, store::ObjectStore, uploader::UploaderConfig},
};
use model::{
    migration::{MigrationContext, MigrationSnapshot},
    remote::SyncCommandStatus,
    stage::MigrationStage,
    transfer::TransferReportSnapshot,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External systems the phases talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub object_store: Arc<dyn ObjectStore>,
    pub commands: Arc<dyn CommandExecutor>,
    pub stacks: Arc<dyn StackProvisioner>,
    pub extractor: Arc<dyn DatabaseExtractor>,
}

/// A transfer that is running or has run, kept for status and abort.
#[derive(Clone)]
struct ActiveTransfer {
    pipeline: Arc<TransferPipeline>,
    cancel: CancellationToken,
}

impl ActiveTransfer {
    fn abort(&self) {
        self.pipeline.stop();
        self.pipeline.report().mark_failed();
        self.cancel.cancel();
    }
}

/// Runs the migration phases in order against the singleton migration.
pub struct Orchestrator {
    migration: Arc<MigrationService>,
    settings: Arc<ValidatedSettings>,
    collaborators: Collaborators,
    filesystem: Mutex<Option<ActiveTransfer>>,
    database: Mutex<Option<ActiveTransfer>>,
}

impl Orchestrator {
    pub fn new(
        migration: Arc<MigrationService>,
        settings: Arc<ValidatedSettings>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            migration,
            settings,
            collaborators,
            filesystem: Mutex::new(None),
            database: Mutex::new(None),
        }
    }

    pub fn migration(&self) -> &Arc<MigrationService> {
        &self.migration
    }

    pub fn settings(&self) -> &ValidatedSettings {
        &self.settings
    }

    /// Creates the migration and moves it to `Authentication`.
    pub async fn start(&self) -> Result<MigrationSnapshot, StageError> {
        self.migration.create_migration().await?;
        self.migration
            .transition(MigrationStage::Authentication)
            .await?;
        self.migration.current_migration().await
    }

    /// Records that cloud credentials were accepted.
    pub async fn authenticated(&self) -> Result<(), StageError> {
        self.migration
            .transition(MigrationStage::ProvisionApplication)
            .await
    }

    pub async fn provision_application(
        &self,
        stack_name: &str,
        params: HashMap<String, String>,
    ) -> Result<DeployedStack, PhaseError> {
        let template_url = self
            .settings
            .application_template_url
            .clone()
            .ok_or(PhaseError::MissingSetting("application_template_url"))?;

        let deployment = Arc::new(StackDeployment::new(
            self.collaborators.stacks.clone(),
            template_url,
            stack_name,
            params,
        ));
        let callback = ApplicationProvisioningCallback::new(self.migration.clone());
        let poller = &self.stack_poller();
        let deployment = &deployment;

        run_phase(
            &callback,
            &self.migration,
            async {
                let stack_id = deployment.initiate().await?;
                self.migration
                    .update_context(|context| {
                        context.application_deployment_id = Some(stack_name.to_string())
                    })
                    .await?;
                Ok::<_, PhaseError>(stack_id)
            },
            |stack_id| async move {
                let stack = poller.clone().spawn(deployment.clone(), stack_id).await??;
                Ok::<_, PhaseError>(stack)
            },
        )
        .await
    }

    /// Deploys the helper stack next to the application stack and records its outputs.
    pub async fn provision_migration_stack(
        &self,
        params: HashMap<String, String>,
    ) -> Result<HelperStackOutputs, PhaseError> {
        let template_url = self
            .settings
            .migration_template_url
            .clone()
            .ok_or(PhaseError::MissingSetting("migration_template_url"))?;
        let application = self
            .migration
            .current_context()
            .await?
            .application_deployment_id
            .ok_or(PhaseError::MissingContext("application deployment id"))?;
        let stack_name = helper_stack_name(&application);

        let deployment = Arc::new(StackDeployment::new(
            self.collaborators.stacks.clone(),
            template_url,
            stack_name.clone(),
            params,
        ));
        let callback = MigrationStackProvisioningCallback::new(self.migration.clone());
        let poller = &self.stack_poller();
        let deployment = &deployment;

        run_phase(
            &callback,
            &self.migration,
            async {
                let stack_id = deployment.initiate().await?;
                self.migration
                    .update_context(|context| context.helper_stack_deployment_id = Some(stack_name.clone()))
                    .await?;
                Ok::<_, PhaseError>(stack_id)
            },
            |stack_id| async move {
                let stack = poller.clone().spawn(deployment.clone(), stack_id).await??;
                let outputs = HelperStackOutputs::from_outputs(deployment.stack_name(), &stack.outputs)?;
                self.migration
                    .update_context(|context| record_helper_outputs(context, &outputs))
                    .await?;
                Ok::<_, PhaseError>(outputs)
            },
        )
        .await
    }

    /// Uploads the shared home, then has the migration host download it.
    pub async fn migrate_filesystem(&self) -> Result<TransferReportSnapshot, PhaseError> {
        let shared_home = self
            .settings
            .shared_home
            .clone()
            .ok_or(PhaseError::MissingSetting("shared_home"))?;
        let context = self.migration.current_context().await?;
        let host = self.migration_host(&context)?;
        let bucket = self.migration_bucket(&context)?;
        let download_document = context
            .fs_restore_document
            .clone()
            .ok_or(PhaseError::MissingContext("filesystem download document"))?;
        let status_document = context
            .fs_restore_status_document
            .clone()
            .ok_or(PhaseError::MissingContext("filesystem download status document"))?;

        let active = &self.prepare_transfer(&bucket, None);
        let callback = FilesystemMigrationCallback::new(self.migration.clone());
        let (shared_home, host) = (&shared_home, &host);
        let (download_document, status_document) = (&download_document, &status_document);

        run_phase(
            &callback,
            &self.migration,
            async { Ok::<_, PhaseError>(()) },
            |()| async move {
                self.install(&self.filesystem, active, MigrationStage::FsMigrationCopyWait)
                    .await?;
                let uploaded = active.pipeline.transfer(shared_home).await?;
                if active.cancel.is_cancelled() {
                    return Err(PhaseError::Aborted);
                }
                info!(
                    found = uploaded.found,
                    failed = uploaded.failed.len(),
                    host = %host,
                    "Shared home uploaded, starting download on the migration host"
                );

                self.download_filesystem(host, download_document, status_document, &active.cancel)
                    .await?;
                Ok::<_, PhaseError>(active.pipeline.report().snapshot())
            },
        )
        .await
    }

    async fn download_filesystem(
        &self,
        host: &str,
        download_document: &str,
        status_document: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncCommandStatus, PhaseError> {
        let launch = RemoteCommand::new(
            self.collaborators.commands.clone(),
            download_document,
            host,
            EnsureSuccess,
        )
        .with_timeout(self.settings.command_timeout);
        self.command_poller(cancel).run(&launch).await?;

        let query = RemoteCommand::new(
            self.collaborators.commands.clone(),
            status_document,
            host,
            ParseJson::default(),
        )
        .with_timeout(self.settings.command_timeout);
        let progress = DownloadProgress::new(query, self.command_poller(cancel), host);

        let poller = Poller::new(PollStrategy::Deadline {
            interval: self.settings.fs_download_poll_interval,
            timeout: self.settings.fs_download_timeout,
        })
        .with_cancellation(cancel.clone());

        Ok(poller.run(&progress).await?)
    }

    /// Export, upload and restore of the database, from `OfflineWarning` to `Validate`.
    pub async fn migrate_database(&self) -> Result<TransferReportSnapshot, PhaseError> {
        let context = self.migration.current_context().await?;
        let host = self.migration_host(&context)?;
        let bucket = self.migration_bucket(&context)?;
        let restore_document = context
            .db_restore_document
            .clone()
            .ok_or(PhaseError::MissingContext("database restore document"))?;

        if self.migration.current_stage().await? == MigrationStage::OfflineWarning {
            self.migration
                .transition(MigrationStage::DbMigrationExport)
                .await?;
        }

        let active = &self.prepare_transfer(&bucket, Some(DUMP_DIR_NAME));
        let dump_dir = &self.settings.dump_dir;

        let export = DatabaseExportCallback::new(self.migration.clone());
        let dump = run_phase(
            &export,
            &self.migration,
            async { Ok::<_, PhaseError>(()) },
            |()| async move {
                self.install(&self.database, active, MigrationStage::DbMigrationExportWait)
                    .await?;
                let dump = tokio::select! {
                    _ = active.cancel.cancelled() => return Err(PhaseError::Aborted),
                    dump = self.collaborators.extractor.dump(dump_dir) => dump?,
                };
                info!(dump = %dump.display(), "Database exported");
                Ok::<_, PhaseError>(dump)
            },
        )
        .await?;

        let upload = DatabaseUploadCallback::new(self.migration.clone());
        let uploaded = run_phase(
            &upload,
            &self.migration,
            async { Ok::<_, PhaseError>(dump) },
            |dump| async move {
                let report = active.pipeline.transfer(&dump).await?;
                if active.cancel.is_cancelled() {
                    return Err(PhaseError::Aborted);
                }
                if !report.failed.is_empty() {
                    return Err(PhaseError::IncompleteUpload {
                        found: report.found,
                        failed: report.failed.len(),
                    });
                }
                Ok::<_, PhaseError>(report)
            },
        )
        .await?;

        let restore = DatabaseRestoreCallback::new(self.migration.clone());
        let command = &RemoteCommand::new(
            self.collaborators.commands.clone(),
            restore_document,
            host,
            EnsureSuccess,
        )
        .with_timeout(self.settings.command_timeout);
        let poller = &self.command_poller(&active.cancel);

        run_phase(
            &restore,
            &self.migration,
            async { Ok::<_, PhaseError>(command.initiate().await?) },
            |command_id| async move {
                let stdout = poller.poll_until_terminal(command, &command_id).await?;
                info!(command_id = %command_id, output = %stdout.trim(), "Database restore finished");
                Ok::<_, PhaseError>(())
            },
        )
        .await?;

        Ok(uploaded)
    }

    pub async fn cutover(&self) -> Result<(), StageError> {
        self.migration.transition(MigrationStage::Cutover).await
    }

    pub async fn finish(&self) -> Result<(), StageError> {
        self.migration.transition(MigrationStage::Finished).await
    }

    /// Stops a running filesystem migration and moves the migration to `Error`.
    pub async fn abort_filesystem_migration(&self) -> Result<(), StageError> {
        self.migration
            .error_if_in(
                MigrationStage::FsMigrationCopyWait,
                &"filesystem migration aborted",
            )
            .await?;

        if let Some(active) = current(&self.filesystem) {
            active.abort();
        }
        warn!("Filesystem migration aborted");
        Ok(())
    }

    pub async fn abort_database_migration(&self) -> Result<(), StageError> {
        let stage = self
            .migration
            .error_when(
                |actual| {
                    if actual.is_db_phase() {
                        Ok(())
                    } else {
                        Err(StageError::NotInPhase {
                            phase: "database migration",
                            actual,
                        })
                    }
                },
                &"database migration aborted",
            )
            .await?;

        if let Some(active) = current(&self.database) {
            active.abort();
        }
        warn!(%stage, "Database migration aborted");
        Ok(())
    }

    pub async fn status(&self) -> Result<MigrationStatus, StageError> {
        let migration = self.migration.current_migration().await?;
        Ok(MigrationStatus {
            stage: migration.stage,
            last_error: migration.last_error,
            filesystem: current(&self.filesystem).map(|a| a.pipeline.report().snapshot()),
            database: current(&self.database).map(|a| a.pipeline.report().snapshot()),
        })
    }

    fn prepare_transfer(&self, bucket: &str, key_prefix: Option<&str>) -> ActiveTransfer {
        let config = UploaderConfig {
            max_in_flight: self.settings.max_concurrent_uploads,
            multipart_threshold: self.settings.multipart_threshold_bytes,
            part_size: self.settings.multipart_part_size_bytes,
            key_prefix: key_prefix.map(str::to_string),
            ..UploaderConfig::new(bucket)
        };
        ActiveTransfer {
            pipeline: Arc::new(TransferPipeline::new(
                self.collaborators.object_store.clone(),
                config,
            )),
            cancel: CancellationToken::new(),
        }
    }

    /// Publishes `active` for status and abort once its phase owns the wait stage.
    ///
    /// A rejected duplicate run never gets here, so it cannot replace the transfer
    /// of the run that is in progress.
    async fn install(
        &self,
        slot: &Mutex<Option<ActiveTransfer>>,
        active: &ActiveTransfer,
        wait_stage: MigrationStage,
    ) -> Result<(), PhaseError> {
        *lock(slot) = Some(active.clone());

        // An abort that landed before the slot was filled could not reach this transfer.
        if self.migration.current_stage().await? != wait_stage {
            active.abort();
            return Err(PhaseError::Aborted);
        }
        Ok(())
    }

    fn stack_poller(&self) -> Poller {
        Poller::new(PollStrategy::Deadline {
            interval: self.settings.stack_poll_interval,
            timeout: self.settings.stack_timeout,
        })
    }

    fn command_poller(&self, cancel: &CancellationToken) -> Poller {
        Poller::new(PollStrategy::Attempts {
            max_attempts: self.settings.command_poll_attempts,
            interval: self.settings.command_poll_interval,
        })
        .with_cancellation(cancel.clone())
    }

    fn migration_bucket(&self, context: &MigrationContext) -> Result<String, PhaseError> {
        self.settings
            .bucket
            .clone()
            .or_else(|| context.migration_bucket.clone())
            .ok_or(PhaseError::MissingContext("migration bucket"))
    }

    fn migration_host(&self, context: &MigrationContext) -> Result<String, PhaseError> {
        self.settings
            .instance_id
            .clone()
            .or_else(|| context.migration_host_instance_id.clone())
            .ok_or(PhaseError::MissingContext("migration host instance id"))
    }
}

fn record_helper_outputs(context: &mut MigrationContext, outputs: &HelperStackOutputs) {
    context.fs_restore_document = Some(outputs.download_document.clone());
    context.fs_restore_status_document = Some(outputs.download_status_document.clone());
    context.db_restore_document = Some(outputs.restore_document.clone());
    context.migration_bucket = Some(outputs.migration_bucket.clone());
    context.migration_host_instance_id = Some(outputs.host_instance_id.clone());
}

fn current(slot: &Mutex<Option<ActiveTransfer>>) -> Option<ActiveTransfer> {
    lock(slot).clone()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use async_trait::async_trait;
    use engine_config::settings::MigrationSettings;
    use engine_core::state::sled_store::SledMigrationStore;
    use engine_processing::{
        error::RemoteCallError,
        remote::command::CommandInvocation,
        transfer::local::LocalObjectStore,
    };
    use model::remote::StackStatus;
    use std::{path::Path, path::PathBuf, time::Duration};

    struct Unreachable;

    #[async_trait]
    impl CommandExecutor for Unreachable {
        async fn run_document(
            &self,
            _document: &str,
            _target: &str,
            _params: &HashMap<String, Vec<String>>,
            _timeout: Duration,
        ) -> Result<String, RemoteCallError> {
            Err(RemoteCallError::Rejected("no control plane".into()))
        }

        async fn command_status(
            &self,
            _command_id: &str,
            _target: &str,
        ) -> Result<CommandInvocation, RemoteCallError> {
            Err(RemoteCallError::Rejected("no control plane".into()))
        }
    }

    #[async_trait]
    impl StackProvisioner for Unreachable {
        async fn provision_stack(
            &self,
            _template_url: &str,
            _name: &str,
            _params: &HashMap<String, String>,
        ) -> Result<Option<String>, RemoteCallError> {
            Ok(None)
        }

        async fn stack_status(&self, _name: &str) -> Result<StackStatus, RemoteCallError> {
            Err(RemoteCallError::Rejected("no control plane".into()))
        }

        async fn stack_outputs(
            &self,
            _name: &str,
        ) -> Result<HashMap<String, String>, RemoteCallError> {
            Ok(HashMap::new())
        }
    }

    #[async_trait]
    impl DatabaseExtractor for Unreachable {
        async fn dump(&self, dir: &Path) -> Result<PathBuf, ExtractError> {
            Err(ExtractError::Failed {
                program: "pg_dump".into(),
                code: Some(1),
                stderr: format!("cannot dump into {}", dir.display()),
            })
        }
    }

    fn orchestrator(settings: MigrationSettings, store_root: &Path) -> Orchestrator {
        let migration = Arc::new(MigrationService::new(Arc::new(
            SledMigrationStore::temporary().unwrap(),
        )));
        let collaborators = Collaborators {
            object_store: Arc::new(LocalObjectStore::new(store_root)),
            commands: Arc::new(Unreachable),
            stacks: Arc::new(Unreachable),
            extractor: Arc::new(Unreachable),
        };
        Orchestrator::new(migration, Arc::new(settings.validate().unwrap()), collaborators)
    }

    fn settings(state: &Path) -> MigrationSettings {
        MigrationSettings {
            state_dir: Some(state.to_path_buf()),
            application_template_url: Some("https://templates/app.yml".into()),
            ..MigrationSettings::default()
        }
    }

    async fn walk_to(orchestrator: &Orchestrator, target: MigrationStage) {
        let migration = orchestrator.migration();
        let mut stage = migration.current_stage().await.unwrap();
        while stage != target {
            stage = stage.successor().unwrap();
            migration.transition(stage).await.unwrap();
        }
    }

    #[tokio::test]
    async fn start_moves_to_authentication_once() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(settings(dir.path()), dir.path());

        let snapshot = orchestrator.start().await.unwrap();
        assert_eq!(snapshot.stage, MigrationStage::Authentication);
        assert!(matches!(
            orchestrator.start().await,
            Err(StageError::MigrationAlreadyExists { .. })
        ));

        orchestrator.authenticated().await.unwrap();
        assert_eq!(
            orchestrator.status().await.unwrap().stage,
            MigrationStage::ProvisionApplication
        );
    }

    #[tokio::test]
    async fn rejected_provisioning_routes_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(settings(dir.path()), dir.path());
        walk_to(&orchestrator, MigrationStage::ProvisionApplication).await;

        let err = orchestrator
            .provision_application("app", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Operation(_)));

        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.stage, MigrationStage::Error);
        assert!(status.last_error.unwrap().contains("Cannot start"));
    }

    #[tokio::test]
    async fn missing_helper_outputs_leave_stage_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.shared_home = Some(dir.path().to_path_buf());
        let orchestrator = orchestrator(settings, dir.path());
        walk_to(&orchestrator, MigrationStage::FsMigrationCopy).await;

        let err = orchestrator.migrate_filesystem().await.unwrap_err();
        assert!(matches!(err, PhaseError::MissingContext(_)));
        assert_eq!(
            orchestrator.status().await.unwrap().stage,
            MigrationStage::FsMigrationCopy
        );
    }

    #[tokio::test]
    async fn aborts_require_their_phase() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(settings(dir.path()), dir.path());
        walk_to(&orchestrator, MigrationStage::FsMigrationCopy).await;

        assert!(matches!(
            orchestrator.abort_filesystem_migration().await,
            Err(StageError::UnexpectedStage { .. })
        ));
        assert!(matches!(
            orchestrator.abort_database_migration().await,
            Err(StageError::NotInPhase { .. })
        ));

        walk_to(&orchestrator, MigrationStage::FsMigrationCopyWait).await;
        orchestrator.abort_filesystem_migration().await.unwrap();

        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.stage, MigrationStage::Error);
        assert_eq!(
            status.last_error.as_deref(),
            Some("filesystem migration aborted")
        );
    }

    #[tokio::test]
    async fn abort_after_the_phase_moved_on_keeps_its_stage() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(settings(dir.path()), dir.path());
        walk_to(&orchestrator, MigrationStage::OfflineWarning).await;

        assert!(matches!(
            orchestrator.abort_filesystem_migration().await,
            Err(StageError::UnexpectedStage {
                actual: MigrationStage::OfflineWarning,
                ..
            })
        ));
        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.stage, MigrationStage::OfflineWarning);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn failed_export_routes_to_error_and_keeps_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.bucket = Some("bucket".into());
        settings.instance_id = Some("i-1".into());
        let orchestrator = orchestrator(settings, dir.path());
        orchestrator
            .migration()
            .update_context(|context| context.db_restore_document = Some("restore".into()))
            .await
            .unwrap();
        walk_to(&orchestrator, MigrationStage::OfflineWarning).await;

        let err = orchestrator.migrate_database().await.unwrap_err();
        assert!(matches!(err, PhaseError::Extract(_)));

        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.stage, MigrationStage::Error);
        assert!(status.database.is_some());
        assert!(status.filesystem.is_none());
    }
}
