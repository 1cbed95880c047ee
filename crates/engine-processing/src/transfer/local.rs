use crate::{
    error::ObjectStoreError,
    transfer::store::{CompletedPart, ObjectStore, PutResult},
};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

const MULTIPART_DIR: &str = ".multipart";

/// Object store backed by a local directory; each bucket is a sub-directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe || bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == MULTIPART_DIR {
            return Err(ObjectStoreError::InvalidKey(format!("{bucket}/{key}")));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn upload_dir(&self, upload_id: &str) -> Result<PathBuf, ObjectStoreError> {
        if Uuid::parse_str(upload_id).is_err() {
            return Err(ObjectStoreError::UnknownUpload(upload_id.to_string()));
        }
        Ok(self.root.join(MULTIPART_DIR).join(upload_id))
    }

    async fn ensure_parent(path: &Path) -> Result<(), ObjectStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| ObjectStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> ObjectStoreError + '_ {
    move |source| ObjectStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<PutResult, ObjectStoreError> {
        let target = self.object_path(bucket, key)?;
        Self::ensure_parent(&target).await?;

        let bytes = fs::copy(path, &target).await.map_err(io(path))?;
        debug!(key, bytes, "Stored object");
        Ok(PutResult::ok(format!("Stored {bytes} bytes")))
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, ObjectStoreError> {
        self.object_path(bucket, key)?;
        let upload_id = Uuid::new_v4().to_string();
        let dir = self.upload_dir(&upload_id)?;
        fs::create_dir_all(&dir).await.map_err(io(&dir))?;
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, ObjectStoreError> {
        let dir = self.upload_dir(upload_id)?;
        if !fs::try_exists(&dir).await.map_err(io(&dir))? {
            return Err(ObjectStoreError::UnknownUpload(upload_id.to_string()));
        }

        let part_path = dir.join(format!("{part_number:05}"));
        fs::write(&part_path, &body).await.map_err(io(&part_path))?;
        Ok(CompletedPart {
            part_number,
            etag: format!("{upload_id}-{part_number}"),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut parts: Vec<CompletedPart>,
    ) -> Result<PutResult, ObjectStoreError> {
        let dir = self.upload_dir(upload_id)?;
        let target = self.object_path(bucket, key)?;
        Self::ensure_parent(&target).await?;

        parts.sort_by_key(|p| p.part_number);
        let mut out = fs::File::create(&target).await.map_err(io(&target))?;
        let mut total = 0u64;
        for part in &parts {
            let part_path = dir.join(format!("{:05}", part.part_number));
            let body = fs::read(&part_path).await.map_err(io(&part_path))?;
            out.write_all(&body).await.map_err(io(&target))?;
            total += body.len() as u64;
        }
        out.flush().await.map_err(io(&target))?;
        fs::remove_dir_all(&dir).await.map_err(io(&dir))?;

        Ok(PutResult::ok(format!(
            "Stored {total} bytes in {} parts",
            parts.len()
        )))
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), ObjectStoreError> {
        let dir = self.upload_dir(upload_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ObjectStoreError::Io { path: dir, source }),
        }
    }
}
