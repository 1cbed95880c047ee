use crate::{error::StoreError, state::MigrationStore};
use async_trait::async_trait;
use model::migration::{Migration, MigrationContext};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const MIGRATION_PREFIX: &str = "migration:";
const CONTEXT_PREFIX: &str = "context:";

pub struct SledMigrationStore {
    db: sled::Db,
    create_lock: Mutex<()>,
}

impl SledMigrationStore {
    /// Every write is flushed explicitly, so no background flusher is started.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(None)
            .open()?;
        Ok(Self::with_db(db))
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .flush_every_ms(None)
            .open()?;
        Ok(Self::with_db(db))
    }

    fn with_db(db: sled::Db) -> Self {
        Self {
            db,
            create_lock: Mutex::new(()),
        }
    }

    #[inline]
    fn migration_key(id: u64) -> String {
        format!("{MIGRATION_PREFIX}{id}")
    }

    #[inline]
    fn context_key(id: u64) -> String {
        format!("{CONTEXT_PREFIX}{id}")
    }

    fn migrations(&self) -> Result<Vec<Migration>, StoreError> {
        let mut migrations = Vec::new();
        for item in self.db.scan_prefix(MIGRATION_PREFIX) {
            let (_key, value) = item?;
            migrations.push(bincode::deserialize(&value)?);
        }
        Ok(migrations)
    }
}

#[async_trait]
impl MigrationStore for SledMigrationStore {
    async fn find_or_create_migration(&self) -> Result<Migration, StoreError> {
        let _guard = self.create_lock.lock().await;

        let mut migrations = self.migrations()?;
        match migrations.len() {
            // An interrupted migration is picked up where it left off.
            1 => Ok(migrations.remove(0)),
            0 => {
                let migration = Migration::new(self.db.generate_id()?);
                let context = MigrationContext::for_migration(migration.id);

                let mut batch = sled::Batch::default();
                batch.insert(
                    Self::migration_key(migration.id).as_bytes(),
                    bincode::serialize(&migration)?,
                );
                batch.insert(
                    Self::context_key(migration.id).as_bytes(),
                    bincode::serialize(&context)?,
                );
                self.db.apply_batch(batch)?;
                self.db.flush_async().await?;

                info!(migration_id = migration.id, "Created migration record");
                Ok(migration)
            }
            count => {
                error!(count, "Expected one migration, found multiple");
                Err(StoreError::ConsistencyViolation { count })
            }
        }
    }

    async fn save_migration(&self, migration: &Migration) -> Result<(), StoreError> {
        let bytes = bincode::serialize(migration)?;
        self.db.insert(Self::migration_key(migration.id), bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn load_context(&self, migration_id: u64) -> Result<MigrationContext, StoreError> {
        match self.db.get(Self::context_key(migration_id))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(MigrationContext::for_migration(migration_id)),
        }
    }

    async fn save_context(&self, context: &MigrationContext) -> Result<(), StoreError> {
        let bytes = bincode::serialize(context)?;
        self.db.insert(Self::context_key(context.migration_id), bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let _guard = self.create_lock.lock().await;

        let mut batch = sled::Batch::default();
        let mut deleted = 0;
        for migration in self.migrations()? {
            batch.remove(Self::context_key(migration.id).as_bytes());
            batch.remove(Self::migration_key(migration.id).as_bytes());
            warn!(migration_id = migration.id, stage = %migration.stage, "Deleted migration");
            deleted += 1;
        }
        self.db.apply_batch(batch)?;
        self.db.flush_async().await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::stage::MigrationStage;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn concurrent_find_or_create_yields_one_migration() {
        let store = Arc::new(SledMigrationStore::temporary().unwrap());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.find_or_create_migration().await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.migrations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persists_stage_across_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = SledMigrationStore::open(dir.path()).unwrap();
            let mut migration = store.find_or_create_migration().await.unwrap();
            migration.stage = MigrationStage::Authentication;
            store.save_migration(&migration).await.unwrap();
            migration.id
        };

        let store = SledMigrationStore::open(dir.path()).unwrap();
        let migration = store.find_or_create_migration().await.unwrap();
        assert_eq!(migration.id, id);
        assert_eq!(migration.stage, MigrationStage::Authentication);
    }

    #[tokio::test]
    async fn multiple_records_are_a_consistency_violation() {
        let store = SledMigrationStore::temporary().unwrap();
        store.find_or_create_migration().await.unwrap();
        store.save_migration(&Migration::new(999)).await.unwrap();

        let err = store.find_or_create_migration().await.unwrap_err();
        assert!(matches!(err, StoreError::ConsistencyViolation { count: 2 }));
    }

    #[tokio::test]
    async fn delete_all_removes_migration_and_context() {
        let store = SledMigrationStore::temporary().unwrap();
        let migration = store.find_or_create_migration().await.unwrap();

        let mut context = store.load_context(migration.id).await.unwrap();
        context.migration_bucket = Some("bucket".into());
        store.save_context(&context).await.unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 1);
        assert!(store.migrations().unwrap().is_empty());
        assert!(
            store
                .db
                .get(SledMigrationStore::context_key(migration.id))
                .unwrap()
                .is_none()
        );

        let fresh = store.find_or_create_migration().await.unwrap();
        assert_ne!(fresh.id, migration.id);
        assert_eq!(fresh.stage, MigrationStage::NotStarted);
    }
}
