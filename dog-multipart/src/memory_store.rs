use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::{
    CompletedPart, MultipartError, MultipartResult, MultipartStore, ObjectDescriptor, PartRecord,
    PartsPage, PresignedLink, StoreCapabilities, UploadId, S3_MAX_PARTS,
};

/// Page cap applied by AWS S3 and Ceph RGW to ListParts
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 1000;

const URL_SCHEME: &str = "memory://";

/// In-process multipart backend for tests and development.
///
/// Follows S3 semantics closely enough to exercise the coordinator: paged
/// ListParts (1000 per page unless configured otherwise), MD5 part ETags,
/// multipart-style final ETags, strict ordering on complete, and uploads
/// that disappear once completed or aborted.
#[derive(Clone)]
pub struct MemoryMultipartStore {
    bucket: String,
    page_size: Option<u32>,
    min_part_size: u64,
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    uploads: HashMap<String, PendingUpload>,
    objects: HashMap<String, StoredObject>,
}

struct PendingUpload {
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, StoredPart>,
}

struct StoredPart {
    data: Bytes,
    digest: md5::Digest,
    etag: String,
}

struct StoredObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
}

impl MemoryMultipartStore {
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: Some(DEFAULT_LIST_PAGE_SIZE),
            min_part_size: 0,
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    /// Cap ListParts responses at `page_size` entries
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Return every part in one ListParts response, like MinIO
    pub fn unlimited_pages(mut self) -> Self {
        self.page_size = None;
        self
    }

    /// Refuse to complete uploads whose non-final parts are smaller than this
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Number of uploads that are neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.state.read().uploads.len()
    }

    /// Content type of a committed object
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.state.read().objects.get(key).and_then(|o| o.content_type.clone())
    }

    /// ETag of a committed object, as a HEAD request would report it
    pub fn object_etag(&self, key: &str) -> Option<String> {
        self.state.read().objects.get(key).map(|o| o.etag.clone())
    }

    /// Upload a part through a link produced by `presign_part`
    pub async fn put_presigned(&self, url: &str, body: Bytes) -> MultipartResult<PartRecord> {
        let link = SignedPart::parse(url, &self.bucket)?;
        if chrono::Utc::now().timestamp() >= link.expires_at {
            return Err(MultipartError::backend_message("put_presigned", "presigned link has expired")
                .for_upload(link.upload_id.as_str())
                .for_part(link.part_number));
        }
        self.put_part(&link.key, &link.upload_id, link.part_number, body).await
    }

    fn unknown_upload(upload_id: &UploadId) -> MultipartError {
        MultipartError::not_found(upload_id.as_str())
    }

    fn with_upload<R>(
        &self,
        key: &str,
        upload_id: &UploadId,
        f: impl FnOnce(&mut PendingUpload) -> MultipartResult<R>,
    ) -> MultipartResult<R> {
        let mut state = self.state.write();
        let upload = state
            .uploads
            .get_mut(upload_id.as_str())
            .filter(|u| u.key == key)
            .ok_or_else(|| Self::unknown_upload(upload_id))?;
        f(upload)
    }

    fn quoted_md5(digest: &md5::Digest) -> String {
        format!("\"{:x}\"", digest)
    }

    /// S3-style ETag of a multipart object: md5 of the part digests, then part count
    fn multipart_etag(digests: &[md5::Digest]) -> String {
        let mut joined = Vec::with_capacity(digests.len() * 16);
        for digest in digests {
            joined.extend_from_slice(&digest.0);
        }
        format!("\"{:x}-{}\"", md5::compute(&joined), digests.len())
    }
}

#[async_trait]
impl MultipartStore for MemoryMultipartStore {
    async fn create_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> MultipartResult<UploadId> {
        if key.is_empty() {
            return Err(MultipartError::backend_message("create_upload", "object key must not be empty"));
        }

        let upload_id = UploadId::from_string(uuid::Uuid::new_v4().simple().to_string());
        self.state.write().uploads.insert(
            upload_id.as_str().to_string(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        expires_in: Duration,
    ) -> MultipartResult<PresignedLink> {
        self.with_upload(key, upload_id, |_| Ok(()))?;

        let expires_at = PresignedLink::expiry_from_now(expires_in);
        let url = format!(
            "{}{}/{}?uploadId={}&partNumber={}&expires={}",
            URL_SCHEME, self.bucket, key, upload_id, part_number, expires_at
        );
        Ok(PresignedLink::new(part_number, url, expires_at))
    }

    async fn put_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<PartRecord> {
        if part_number == 0 || part_number > S3_MAX_PARTS {
            return Err(MultipartError::backend_message(
                "put_part",
                format!("part number must be an integer between 1 and {}", S3_MAX_PARTS),
            )
            .for_upload(upload_id.as_str())
            .for_part(part_number));
        }

        let digest = md5::compute(&body);
        let etag = Self::quoted_md5(&digest);
        let size = body.len() as u64;

        self.with_upload(key, upload_id, |upload| {
            upload.parts.insert(
                part_number,
                StoredPart {
                    data: body,
                    digest,
                    etag: etag.clone(),
                },
            );
            Ok(())
        })?;

        Ok(PartRecord::new(part_number, etag, Some(size)))
    }

    async fn list_parts(
        &self,
        key: &str,
        upload_id: &UploadId,
        marker: Option<&str>,
        max_parts: Option<u32>,
    ) -> MultipartResult<PartsPage> {
        let after = match marker {
            None => 0,
            Some(marker) => marker.parse::<u32>().map_err(|_| {
                MultipartError::backend_message("list_parts", format!("invalid part number marker {:?}", marker))
                    .for_upload(upload_id.as_str())
            })?,
        };
        let limit = match (max_parts, self.page_size) {
            (Some(requested), Some(cap)) => requested.clamp(1, cap),
            (Some(requested), None) => requested.max(1),
            (None, Some(cap)) => cap,
            (None, None) => u32::MAX,
        } as usize;

        self.with_upload(key, upload_id, |upload| {
            let mut remaining = upload.parts.range(after + 1..).peekable();
            let mut parts = Vec::new();
            while parts.len() < limit {
                match remaining.next() {
                    Some((number, part)) => parts.push(PartRecord::new(
                        *number,
                        part.etag.clone(),
                        Some(part.data.len() as u64),
                    )),
                    None => break,
                }
            }
            let is_truncated = remaining.peek().is_some();
            let next_marker = if is_truncated {
                parts.last().map(|p| p.part_number.to_string())
            } else {
                None
            };
            Ok(PartsPage {
                parts,
                is_truncated,
                next_marker,
            })
        })
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> MultipartResult<ObjectDescriptor> {
        let reject = |message: String| {
            MultipartError::backend_message("complete_upload", message).for_upload(upload_id.as_str())
        };

        let mut state = self.state.write();
        let upload = state
            .uploads
            .get(upload_id.as_str())
            .filter(|u| u.key == key)
            .ok_or_else(|| Self::unknown_upload(upload_id))?;

        if parts.is_empty() {
            return Err(reject("at least one part must be specified".to_string()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(reject("parts must be listed in ascending part number order".to_string()));
        }

        let mut body = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len());
        for (index, requested) in parts.iter().enumerate() {
            let stored = upload
                .parts
                .get(&requested.part_number)
                .filter(|stored| stored.etag == requested.etag)
                .ok_or_else(|| reject(format!("part {} could not be found or its ETag did not match", requested.part_number)))?;

            let is_last = index + 1 == parts.len();
            if !is_last && (stored.data.len() as u64) < self.min_part_size {
                return Err(reject(format!(
                    "part {} is smaller than the minimum allowed size of {}",
                    requested.part_number, self.min_part_size
                )));
            }
            body.extend_from_slice(&stored.data);
            digests.push(stored.digest);
        }

        let etag = Self::multipart_etag(&digests);
        let data = body.freeze();
        let size_bytes = data.len() as u64;
        let content_type = upload.content_type.clone();

        state.uploads.remove(upload_id.as_str());
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                etag: etag.clone(),
                content_type,
            },
        );

        Ok(ObjectDescriptor {
            key: key.to_string(),
            etag: Some(etag),
            size_bytes: Some(size_bytes),
        })
    }

    async fn abort_upload(&self, key: &str, upload_id: &UploadId) -> MultipartResult<()> {
        let mut state = self.state.write();
        let owned = state
            .uploads
            .get(upload_id.as_str())
            .is_some_and(|upload| upload.key == key);
        if !owned {
            return Err(Self::unknown_upload(upload_id));
        }
        state.uploads.remove(upload_id.as_str());
        Ok(())
    }

    async fn get_object(&self, key: &str) -> MultipartResult<Bytes> {
        self.state
            .read()
            .objects
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| MultipartError::backend_message("get_object", format!("no such key: {}", key)))
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_local_signing()
    }
}

/// Parsed form of a `memory://` presigned link
struct SignedPart {
    key: String,
    upload_id: UploadId,
    part_number: u32,
    expires_at: i64,
}

impl SignedPart {
    fn parse(url: &str, bucket: &str) -> MultipartResult<Self> {
        let invalid = || MultipartError::validation(format!("not a presigned link for bucket {}: {}", bucket, url));

        let rest = url
            .strip_prefix(URL_SCHEME)
            .and_then(|rest| rest.strip_prefix(bucket))
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(invalid)?;
        let (key, query) = rest.rsplit_once('?').ok_or_else(invalid)?;

        let mut upload_id = None;
        let mut part_number = None;
        let mut expires_at = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("uploadId", value)) => upload_id = Some(UploadId::from(value)),
                Some(("partNumber", value)) => part_number = value.parse().ok(),
                Some(("expires", value)) => expires_at = value.parse().ok(),
                _ => {}
            }
        }

        Ok(Self {
            key: key.to_string(),
            upload_id: upload_id.ok_or_else(invalid)?,
            part_number: part_number.ok_or_else(invalid)?,
            expires_at: expires_at.ok_or_else(invalid)?,
        })
    }
}
