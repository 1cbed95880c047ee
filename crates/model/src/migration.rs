use crate::stage::MigrationStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted migration record. Only the stage state machine mutates it;
/// everything else sees a [`MigrationSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: u64,
    pub stage: MigrationStage,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Migration {
    pub fn new(id: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            stage: MigrationStage::NotStarted,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn snapshot(&self) -> MigrationSnapshot {
        MigrationSnapshot {
            id: self.id,
            stage: self.stage,
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only copy of a [`Migration`] taken at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSnapshot {
    pub id: u64,
    pub stage: MigrationStage,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identifiers that one phase produces and a later phase consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationContext {
    pub migration_id: u64,
    pub application_deployment_id: Option<String>,
    pub helper_stack_deployment_id: Option<String>,
    pub migration_bucket: Option<String>,
    pub fs_restore_document: Option<String>,
    pub fs_restore_status_document: Option<String>,
    pub db_restore_document: Option<String>,
    pub migration_host_instance_id: Option<String>,
}

impl MigrationContext {
    pub fn for_migration(migration_id: u64) -> Self {
        Self {
            migration_id,
            ..Default::default()
        }
    }
}
