use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Every point in the lifecycle of an on-premise to cloud migration.
///
/// The happy path is strictly linear: each stage (apart from `NotStarted`)
/// declares exactly one predecessor. `Error` declares none and can be entered
/// from anywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationStage {
    #[default]
    #[serde(rename = "not_started")]
    NotStarted,
    #[serde(rename = "authentication")]
    Authentication,
    #[serde(rename = "provision_app")]
    ProvisionApplication,
    #[serde(rename = "wait_provision_app")]
    ProvisionApplicationWait,
    #[serde(rename = "provision_migration")]
    ProvisionMigrationStack,
    #[serde(rename = "wait_provision_migration")]
    ProvisionMigrationStackWait,
    #[serde(rename = "fs_migration_copy")]
    FsMigrationCopy,
    #[serde(rename = "wait_fs_migration_copy")]
    FsMigrationCopyWait,
    #[serde(rename = "cutover_warning")]
    OfflineWarning,
    #[serde(rename = "db_migration_export")]
    DbMigrationExport,
    #[serde(rename = "wait_db_migration_export")]
    DbMigrationExportWait,
    #[serde(rename = "db_migration_upload")]
    DbMigrationUpload,
    #[serde(rename = "wait_db_migration_upload")]
    DbMigrationUploadWait,
    #[serde(rename = "data_migration_import")]
    DataMigrationImport,
    #[serde(rename = "wait_data_migration_import")]
    DataMigrationImportWait,
    #[serde(rename = "validate")]
    Validate,
    #[serde(rename = "cutover")]
    Cutover,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "error")]
    Error,
}

use MigrationStage::*;

impl MigrationStage {
    /// All stages, in happy-path order, followed by `Error`.
    pub const ALL: [MigrationStage; 19] = [
        NotStarted,
        Authentication,
        ProvisionApplication,
        ProvisionApplicationWait,
        ProvisionMigrationStack,
        ProvisionMigrationStackWait,
        FsMigrationCopy,
        FsMigrationCopyWait,
        OfflineWarning,
        DbMigrationExport,
        DbMigrationExportWait,
        DbMigrationUpload,
        DbMigrationUploadWait,
        DataMigrationImport,
        DataMigrationImportWait,
        Validate,
        Cutover,
        Finished,
        Error,
    ];

    /// The only stage a transition into `self` may start from.
    pub fn predecessor(self) -> Option<MigrationStage> {
        match self {
            NotStarted | Error => None,
            Authentication => Some(NotStarted),
            ProvisionApplication => Some(Authentication),
            ProvisionApplicationWait => Some(ProvisionApplication),
            ProvisionMigrationStack => Some(ProvisionApplicationWait),
            ProvisionMigrationStackWait => Some(ProvisionMigrationStack),
            FsMigrationCopy => Some(ProvisionMigrationStackWait),
            FsMigrationCopyWait => Some(FsMigrationCopy),
            OfflineWarning => Some(FsMigrationCopyWait),
            DbMigrationExport => Some(OfflineWarning),
            DbMigrationExportWait => Some(DbMigrationExport),
            DbMigrationUpload => Some(DbMigrationExportWait),
            DbMigrationUploadWait => Some(DbMigrationUpload),
            DataMigrationImport => Some(DbMigrationUploadWait),
            DataMigrationImportWait => Some(DataMigrationImport),
            Validate => Some(DataMigrationImportWait),
            Cutover => Some(Validate),
            Finished => Some(Cutover),
        }
    }

    /// The stage that declares `self` as its predecessor, if any.
    pub fn successor(self) -> Option<MigrationStage> {
        Self::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.predecessor() == Some(self))
    }

    pub fn is_valid_transition(self, to: MigrationStage) -> bool {
        to == Error || to.predecessor() == Some(self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Finished | Error)
    }

    pub fn is_fs_phase(self) -> bool {
        matches!(self, FsMigrationCopy | FsMigrationCopyWait)
    }

    pub fn is_db_phase(self) -> bool {
        matches!(
            self,
            DbMigrationExport
                | DbMigrationExportWait
                | DbMigrationUpload
                | DbMigrationUploadWait
                | DataMigrationImport
                | DataMigrationImportWait
        )
    }

    pub fn key(self) -> &'static str {
        match self {
            NotStarted => "not_started",
            Authentication => "authentication",
            ProvisionApplication => "provision_app",
            ProvisionApplicationWait => "wait_provision_app",
            ProvisionMigrationStack => "provision_migration",
            ProvisionMigrationStackWait => "wait_provision_migration",
            FsMigrationCopy => "fs_migration_copy",
            FsMigrationCopyWait => "wait_fs_migration_copy",
            OfflineWarning => "cutover_warning",
            DbMigrationExport => "db_migration_export",
            DbMigrationExportWait => "wait_db_migration_export",
            DbMigrationUpload => "db_migration_upload",
            DbMigrationUploadWait => "wait_db_migration_upload",
            DataMigrationImport => "data_migration_import",
            DataMigrationImportWait => "wait_data_migration_import",
            Validate => "validate",
            Cutover => "cutover",
            Finished => "finished",
            Error => "error",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NotStarted => "NOT_STARTED",
            Authentication => "AUTHENTICATION",
            ProvisionApplication => "PROVISION_APPLICATION",
            ProvisionApplicationWait => "PROVISION_APPLICATION_WAIT",
            ProvisionMigrationStack => "PROVISION_MIGRATION_STACK",
            ProvisionMigrationStackWait => "PROVISION_MIGRATION_STACK_WAIT",
            FsMigrationCopy => "FS_MIGRATION_COPY",
            FsMigrationCopyWait => "FS_MIGRATION_COPY_WAIT",
            OfflineWarning => "OFFLINE_WARNING",
            DbMigrationExport => "DB_MIGRATION_EXPORT",
            DbMigrationExportWait => "DB_MIGRATION_EXPORT_WAIT",
            DbMigrationUpload => "DB_MIGRATION_UPLOAD",
            DbMigrationUploadWait => "DB_MIGRATION_UPLOAD_WAIT",
            DataMigrationImport => "DATA_MIGRATION_IMPORT",
            DataMigrationImportWait => "DATA_MIGRATION_IMPORT_WAIT",
            Validate => "VALIDATE",
            Cutover => "CUTOVER",
            Finished => "FINISHED",
            Error => "ERROR",
        }
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("Unknown migration stage: '{0}'")]
pub struct ParseStageError(pub String);

impl FromStr for MigrationStage {
    type Err = ParseStageError;

    /// Accepts either the stable key (`fs_migration_copy`) or the stage name
    /// (`FS_MIGRATION_COPY`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|stage| {
                stage.key().eq_ignore_ascii_case(wanted) || stage.name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}
