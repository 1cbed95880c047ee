#![allow(dead_code)]

use engine_config::settings::{MigrationSettings, validated::ValidatedSettings};
use engine_core::{migration_state::MigrationService, state::sled_store::SledMigrationStore};
use engine_processing::{
    remote::stack::{
        OUTPUT_DOWNLOAD_DOCUMENT, OUTPUT_DOWNLOAD_STATUS_DOCUMENT, OUTPUT_HOST_INSTANCE_ID,
        OUTPUT_MIGRATION_BUCKET, OUTPUT_RESTORE_DOCUMENT,
    },
    transfer::store::ObjectStore,
};
use engine_runtime::{
    execution::orchestrator::{Collaborators, Orchestrator},
    extract::DatabaseExtractor,
};
use model::stage::MigrationStage;
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};
use tempfile::TempDir;
use utils::{ScriptedCommands, ScriptedStacks};

pub mod utils;

pub const BUCKET: &str = "migration-bucket";
pub const HOST: &str = "i-0123456789";
pub const DOWNLOAD_DOCUMENT: &str = "fs-download";
pub const DOWNLOAD_STATUS_DOCUMENT: &str = "fs-download-status";
pub const RESTORE_DOCUMENT: &str = "db-restore";

/// An orchestrator wired to scripted collaborators inside a scratch directory.
pub struct Harness {
    pub dir: TempDir,
    pub orchestrator: Arc<Orchestrator>,
    pub commands: Arc<ScriptedCommands>,
}

impl Harness {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        commands: ScriptedCommands,
        stacks: ScriptedStacks,
        extractor: Arc<dyn DatabaseExtractor>,
        dir: TempDir,
    ) -> Self {
        let commands = Arc::new(commands);
        let migration = Arc::new(MigrationService::new(Arc::new(
            SledMigrationStore::temporary().expect("temporary store"),
        )));
        let collaborators = Collaborators {
            object_store,
            commands: commands.clone(),
            stacks: Arc::new(stacks),
            extractor,
        };
        let settings = Arc::new(fast_settings(&dir));

        Self {
            orchestrator: Arc::new(Orchestrator::new(migration, settings, collaborators)),
            commands,
            dir,
        }
    }

    pub fn migration(&self) -> &Arc<MigrationService> {
        self.orchestrator.migration()
    }

    pub fn shared_home(&self) -> PathBuf {
        self.dir.path().join("shared-home")
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.dir.path().join("objects").join(BUCKET)
    }

    /// Walks the happy path up to `target`.
    pub async fn walk_to(&self, target: MigrationStage) {
        let migration = self.migration();
        let mut stage = migration.current_stage().await.unwrap();
        while stage != target {
            stage = stage.successor().expect("target is on the happy path");
            migration.transition(stage).await.unwrap();
        }
    }

    /// Records helper stack outputs as if the helper stack had been provisioned.
    pub async fn with_helper_outputs(&self) {
        self.migration()
            .update_context(|context| {
                context.fs_restore_document = Some(DOWNLOAD_DOCUMENT.into());
                context.fs_restore_status_document = Some(DOWNLOAD_STATUS_DOCUMENT.into());
                context.db_restore_document = Some(RESTORE_DOCUMENT.into());
                context.migration_bucket = Some(BUCKET.into());
                context.migration_host_instance_id = Some(HOST.into());
            })
            .await
            .unwrap();
    }

    pub async fn stage(&self) -> MigrationStage {
        self.migration().current_stage().await.unwrap()
    }

    /// Polls the persisted stage until it equals `stage`.
    pub async fn wait_for_stage(&self, stage: MigrationStage) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.stage().await != stage {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("migration never reached {stage}"));
    }
}

/// Settings with short poll intervals so scenarios finish quickly.
fn fast_settings(dir: &TempDir) -> ValidatedSettings {
    let settings = MigrationSettings {
        shared_home: Some(dir.path().join("shared-home")),
        state_dir: Some(dir.path().join("state")),
        dump_dir: Some(dir.path().join("dump")),
        application_template_url: Some("https://templates.example/app.yml".into()),
        migration_template_url: Some("https://templates.example/migration.yml".into()),
        max_concurrent_uploads: 4,
        ..MigrationSettings::default()
    };

    let mut validated = settings.validate().expect("valid settings");
    validated.stack_poll_interval = Duration::from_millis(5);
    validated.command_poll_interval = Duration::from_millis(5);
    validated.fs_download_poll_interval = Duration::from_millis(5);
    validated
}

pub fn helper_outputs() -> HashMap<String, String> {
    HashMap::from([
        (OUTPUT_DOWNLOAD_DOCUMENT.to_string(), DOWNLOAD_DOCUMENT.to_string()),
        (
            OUTPUT_DOWNLOAD_STATUS_DOCUMENT.to_string(),
            DOWNLOAD_STATUS_DOCUMENT.to_string(),
        ),
        (OUTPUT_RESTORE_DOCUMENT.to_string(), RESTORE_DOCUMENT.to_string()),
        (OUTPUT_MIGRATION_BUCKET.to_string(), BUCKET.to_string()),
        (OUTPUT_HOST_INSTANCE_ID.to_string(), HOST.to_string()),
    ])
}
