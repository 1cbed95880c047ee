use crate::error::StoreError;
use async_trait::async_trait;
use model::migration::{Migration, MigrationContext};

pub mod sled_store;

/// Persistence for the singleton migration record and its context.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Returns the only migration, creating it (and its context) if none exists.
    /// Concurrent callers must never cause a second record to be created.
    async fn find_or_create_migration(&self) -> Result<Migration, StoreError>;

    async fn save_migration(&self, migration: &Migration) -> Result<(), StoreError>;

    async fn load_context(&self, migration_id: u64) -> Result<MigrationContext, StoreError>;

    async fn save_context(&self, context: &MigrationContext) -> Result<(), StoreError>;

    /// Removes every migration together with its context.
    async fn delete_all(&self) -> Result<usize, StoreError>;
}
