use crate::{
    error::ObjectStoreError,
    transfer::store::{CompletedPart, ObjectStore, PutResult},
};
use std::path::Path;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, warn};

/// Uploads `path` in `part_size` chunks. A failed part aborts the whole upload.
pub async fn upload_multipart(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    path: &Path,
    part_size: u64,
) -> Result<PutResult, ObjectStoreError> {
    let upload_id = store.create_multipart_upload(bucket, key).await?;
    debug!(key, upload_id = %upload_id, "Started multipart upload");

    match upload_parts(store, bucket, key, &upload_id, path, part_size).await {
        Ok(parts) => {
            store
                .complete_multipart_upload(bucket, key, &upload_id, parts)
                .await
        }
        Err(e) => {
            if let Err(abort) = store.abort_multipart_upload(bucket, key, &upload_id).await {
                warn!(key, upload_id = %upload_id, error = %abort, "Failed to abort multipart upload");
            }
            Err(e)
        }
    }
}

async fn upload_parts(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    upload_id: &str,
    path: &Path,
    part_size: u64,
) -> Result<Vec<CompletedPart>, ObjectStoreError> {
    let io_error = |source| ObjectStoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).await.map_err(io_error)?;
    let mut parts = Vec::new();
    let mut part_number = 1u32;

    loop {
        let mut body = Vec::new();
        (&mut file)
            .take(part_size)
            .read_to_end(&mut body)
            .await
            .map_err(io_error)?;
        if body.is_empty() {
            break;
        }

        let last = (body.len() as u64) < part_size;
        let part = store
            .upload_part(bucket, key, upload_id, part_number, body)
            .await?;
        debug!(key, part_number, "Uploaded part");
        parts.push(part);

        if last {
            break;
        }
        part_number += 1;
    }

    Ok(parts)
}
