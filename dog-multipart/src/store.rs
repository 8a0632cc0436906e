use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::{MultipartResult, PartRecord, PresignedLink, UploadId};

/// Multipart primitives of an S3-compatible backend.
///
/// Implementations are thin: they translate each call into one backend
/// request and map "no such upload" to `MultipartError::NotFound`. Pagination,
/// validation and commit safety live above this trait.
#[async_trait]
pub trait MultipartStore: Send + Sync {
    /// Create a backend-side multipart upload for `key`
    async fn create_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> MultipartResult<UploadId>;

    /// Produce a presigned PUT link for one part
    async fn presign_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        expires_in: Duration,
    ) -> MultipartResult<PresignedLink>;

    /// Upload a part's bytes, returning the backend's record of it
    async fn put_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<PartRecord>;

    /// Fetch one page of confirmed parts, starting after `marker`
    async fn list_parts(
        &self,
        key: &str,
        upload_id: &UploadId,
        marker: Option<&str>,
        max_parts: Option<u32>,
    ) -> MultipartResult<PartsPage>;

    /// Compose the final object from parts given in ascending order
    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> MultipartResult<ObjectDescriptor>;

    /// Discard the upload and every part uploaded under it
    async fn abort_upload(&self, key: &str, upload_id: &UploadId) -> MultipartResult<()>;

    /// Read a committed object back in full
    async fn get_object(&self, key: &str) -> MultipartResult<Bytes>;

    /// Get store capabilities
    fn capabilities(&self) -> StoreCapabilities;
}

/// One ListParts response
#[derive(Debug, Clone, Default)]
pub struct PartsPage {
    pub parts: Vec<PartRecord>,
    /// Set when the backend has more parts after this page
    pub is_truncated: bool,
    /// Opaque continuation marker for the next request
    pub next_marker: Option<String>,
}

/// Completed part for a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

impl From<&PartRecord> for CompletedPart {
    fn from(record: &PartRecord) -> Self {
        Self {
            part_number: record.part_number,
            etag: record.etag.clone(),
        }
    }
}

/// What the backend reports about a freshly committed object
#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    pub key: String,
    pub etag: Option<String>,
    pub size_bytes: Option<u64>,
}

/// Store capabilities
#[derive(Debug, Clone, Default)]
pub struct StoreCapabilities {
    /// Presigning is computed locally, without a backend round trip
    pub local_signing: bool,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self::default()
    }

    pub fn with_local_signing(mut self) -> Self {
        self.local_signing = true;
        self
    }
}
