use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{MultipartConfig, MultipartError, MultipartResult, MultipartStore, UploadId};

/// Presigned PUT link for one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedLink {
    pub part: u32,
    pub url: String,
    /// Unix timestamp (seconds) after which the link stops working
    pub expires_at: i64,
}

impl PresignedLink {
    pub fn new<S: Into<String>>(part: u32, url: S, expires_at: i64) -> Self {
        Self {
            part,
            url: url.into(),
            expires_at,
        }
    }

    /// Expiry for a link signed now and valid for `expires_in`
    pub fn expiry_from_now(expires_in: Duration) -> i64 {
        let secs = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX);
        chrono::Utc::now().timestamp().saturating_add(secs)
    }

    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.expires_at
    }
}

/// Generates presigned part links on demand; nothing is cached.
///
/// Links can be regenerated at any time before commit. Parts uploaded under
/// older links stay valid because the backend keys them by upload and part
/// number, not by link.
pub struct LinkGenerator {
    store: Arc<dyn MultipartStore>,
    expiry: Duration,
    concurrency: usize,
}

impl LinkGenerator {
    pub fn new(store: Arc<dyn MultipartStore>, config: &MultipartConfig) -> Self {
        Self {
            store,
            expiry: config.link_expiry,
            concurrency: config.link_concurrency.max(1),
        }
    }

    /// One link per part `1..=part_count`, in part order
    pub async fn links(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_count: u32,
    ) -> MultipartResult<Vec<PresignedLink>> {
        if part_count == 0 {
            return Err(MultipartError::validation("part count must be greater than zero"));
        }

        // Local signing never leaves the process, so there is nothing to overlap
        let concurrency = if self.store.capabilities().local_signing {
            1
        } else {
            self.concurrency
        };

        let links: Vec<PresignedLink> = stream::iter(1..=part_count)
            .map(|part_number| self.link(key, upload_id, part_number))
            .buffered(concurrency)
            .try_collect()
            .await?;

        debug!(upload_id = %upload_id, parts = links.len(), "presigned links generated");
        Ok(links)
    }

    /// Link for a single part
    pub async fn link(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
    ) -> MultipartResult<PresignedLink> {
        self.store
            .presign_part(key, upload_id, part_number, self.expiry)
            .await
            .map_err(|err| err.for_upload(upload_id.as_str()).for_part(part_number))
    }
}
