use crate::error::ObjectStoreError;
use async_trait::async_trait;
use std::path::Path;

/// Outcome of a completed object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub success: bool,
    pub status_text: String,
}

impl PutResult {
    pub fn ok(status_text: impl Into<String>) -> Self {
        Self {
            success: true,
            status_text: status_text.into(),
        }
    }

    pub fn failed(status_text: impl Into<String>) -> Self {
        Self {
            success: false,
            status_text: status_text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Remote object storage the uploader writes into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<PutResult, ObjectStoreError>;

    /// Returns the upload id used by the other multipart calls.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, ObjectStoreError>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, ObjectStoreError>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<PutResult, ObjectStoreError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ObjectStoreError>;
}
