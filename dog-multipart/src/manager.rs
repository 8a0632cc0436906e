use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument};

use crate::{
    MultipartConfig, MultipartError, MultipartResult, MultipartSession, MultipartStore,
    PresignedLink, UploadId, UploadMetadata, UploadPlan, UploadReceipt,
};

/// Request to start a multipart upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub key: String,
    pub size: u64,
    pub part_size: Option<u64>,
    pub parts: Option<u32>,
    pub content_type: Option<String>,
}

impl UploadRequest {
    pub fn new<S: Into<String>>(key: S, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            part_size: None,
            parts: None,
            content_type: None,
        }
    }

    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size = Some(bytes);
        self
    }

    /// Declare the part count; checked against the part size when both are given
    pub fn with_parts(mut self, parts: u32) -> Self {
        self.parts = Some(parts);
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Resolve the part layout and check it against the configured limits
    pub fn plan(&self, config: &MultipartConfig) -> MultipartResult<UploadPlan> {
        if self.key.is_empty() {
            return Err(MultipartError::validation("object key must not be empty"));
        }

        let plan = match (self.part_size, self.parts) {
            (Some(part_size), Some(parts)) => {
                let plan = UploadPlan::new(self.size, part_size)?;
                plan.expect_parts(parts)?;
                plan
            }
            (Some(part_size), None) => UploadPlan::new(self.size, part_size)?,
            (None, Some(parts)) => UploadPlan::with_part_count(self.size, parts)?,
            (None, None) => UploadPlan::new(self.size, config.default_part_size)?,
        };

        config.check_plan(&plan)?;
        Ok(plan)
    }
}

/// Entry point for multipart uploads.
///
/// Stateless over the backend: it creates uploads, hands out session
/// handles and routes commit/abort by the identifiers carried in
/// [`UploadMetadata`].
#[derive(Clone)]
pub struct UploadManager {
    store: Arc<dyn MultipartStore>,
    config: Arc<MultipartConfig>,
}

impl UploadManager {
    /// Create a new upload manager
    pub fn new<S: MultipartStore + 'static>(store: S, config: MultipartConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create over a store that is shared with other components
    pub fn with_shared_store(store: Arc<dyn MultipartStore>, config: MultipartConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    /// Create the backend upload and return the metadata clients carry around
    #[instrument(skip(self, request), fields(key = %request.key, size = request.size))]
    pub async fn initialize_upload(&self, request: UploadRequest) -> MultipartResult<UploadMetadata> {
        let plan = request.plan(&self.config)?;
        let content_type = request
            .content_type
            .as_deref()
            .unwrap_or(self.config.content_type.as_str());

        let upload_id = self.store.create_upload(&request.key, Some(content_type)).await?;

        info!(
            upload_id = %upload_id,
            key = %request.key,
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "multipart upload initialized"
        );
        Ok(UploadMetadata::new(upload_id, request.key, &plan))
    }

    /// Session over an upload whose layout is known from its metadata
    pub fn open(&self, metadata: &UploadMetadata) -> MultipartResult<MultipartSession> {
        let plan = metadata.plan()?;
        Ok(MultipartSession::new(
            self.store.clone(),
            self.config.clone(),
            metadata.key.clone(),
            metadata.upload_id.clone(),
            Some(plan),
        ))
    }

    /// Session over an upload known only by key and identifier.
    ///
    /// Such a session can upload and list parts or abort, but commit and
    /// links need the declared layout, so use [`UploadManager::open`] for those.
    pub fn session<K: Into<String>>(&self, key: K, upload_id: UploadId) -> MultipartSession {
        MultipartSession::new(self.store.clone(), self.config.clone(), key.into(), upload_id, None)
    }

    /// Presigned links for every declared part
    pub async fn links(&self, metadata: &UploadMetadata) -> MultipartResult<Vec<PresignedLink>> {
        self.open(metadata)?.links().await
    }

    /// Commit the upload, refusing while any declared part is unconfirmed
    pub async fn commit_upload(&self, metadata: &UploadMetadata) -> MultipartResult<UploadReceipt> {
        self.open(metadata)?.commit().await
    }

    /// Abort the upload; works for uploads with no parts at all
    pub async fn abort_upload(&self, metadata: &UploadMetadata) -> MultipartResult<()> {
        self.session(metadata.key.clone(), metadata.upload_id.clone())
            .abort()
            .await
    }

    /// Read a committed object back
    pub async fn read_object(&self, key: &str) -> MultipartResult<Bytes> {
        self.store.get_object(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryMultipartStore;

    const MB: u64 = 1 << 20;

    #[test]
    fn request_shapes_resolve_to_the_same_plan() {
        let config = MultipartConfig::default();

        let by_size = UploadRequest::new("k", 12 * MB).with_part_size(7 * MB).plan(&config).unwrap();
        let by_both = UploadRequest::new("k", 12 * MB)
            .with_part_size(7 * MB)
            .with_parts(2)
            .plan(&config)
            .unwrap();
        let by_count = UploadRequest::new("k", 12 * MB).with_parts(2).plan(&config).unwrap();

        assert_eq!(by_size, by_both);
        assert_eq!(by_count.part_count(), 2);
        assert_eq!(by_count.part_size(), 6 * MB);
    }

    #[test]
    fn inconsistent_requests_are_rejected() {
        let config = MultipartConfig::default();

        let mismatched = UploadRequest::new("k", 12 * MB).with_part_size(7 * MB).with_parts(3);
        assert!(matches!(mismatched.plan(&config), Err(MultipartError::Validation { .. })));

        let empty_key = UploadRequest::new("", 12 * MB);
        assert!(matches!(empty_key.plan(&config), Err(MultipartError::Validation { .. })));

        let empty = UploadRequest::new("k", 0);
        assert!(matches!(empty.plan(&config), Err(MultipartError::Validation { .. })));
    }

    #[test]
    fn default_part_size_applies() {
        let config = MultipartConfig::default();
        let plan = UploadRequest::new("k", 20 * MB).plan(&config).unwrap();
        assert_eq!(plan.part_size(), 8 * MB);
        assert_eq!(plan.part_count(), 3);
    }

    #[tokio::test]
    async fn validation_failures_do_not_create_uploads() {
        let store = MemoryMultipartStore::new("bucket");
        let manager = UploadManager::new(store.clone(), MultipartConfig::default());

        let err = manager
            .initialize_upload(UploadRequest::new("k", 12 * MB).with_part_size(MB))
            .await
            .unwrap_err();

        assert!(matches!(err, MultipartError::Validation { .. }));
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn content_type_reaches_the_backend() {
        let store = MemoryMultipartStore::new("bucket");
        let manager = UploadManager::new(store.clone(), MultipartConfig::default());

        let metadata = manager
            .initialize_upload(UploadRequest::new("doc.txt", 3).with_content_type("text/plain"))
            .await
            .unwrap();
        let session = manager.open(&metadata).unwrap();
        session.upload_part(1, Bytes::from_static(b"abc")).await.unwrap();
        manager.commit_upload(&metadata).await.unwrap();

        assert_eq!(store.content_type("doc.txt").as_deref(), Some("text/plain"));
    }
}
