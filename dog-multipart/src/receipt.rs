use serde::{Deserialize, Serialize};

use crate::{ObjectDescriptor, UploadId, UploadMetadata};

/// Receipt returned after a multipart upload is committed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub key: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
    pub upload_id: UploadId,
    pub part_size: u64,
    pub parts: u32,
    pub committed_at: i64,
}

impl UploadReceipt {
    /// Build a receipt from the committed upload's metadata.
    ///
    /// The declared size is used because S3 does not echo the final length
    /// back from CompleteMultipartUpload.
    pub fn new(metadata: &UploadMetadata, object: ObjectDescriptor) -> Self {
        Self {
            key: object.key,
            size_bytes: object.size_bytes.unwrap_or(metadata.size),
            etag: object.etag,
            upload_id: metadata.upload_id.clone(),
            part_size: metadata.part_size,
            parts: metadata.parts,
            committed_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Set etag
    pub fn with_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Whether the backend reported a multipart-style ETag (`"<md5>-<parts>"`)
    pub fn has_multipart_etag(&self) -> bool {
        self.etag
            .as_deref()
            .map(|etag| etag.trim_matches('"'))
            .and_then(|etag| etag.rsplit_once('-'))
            .is_some_and(|(_, count)| count.parse::<u32>().is_ok())
    }
}
