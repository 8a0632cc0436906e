use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::ops::{Range, RangeInclusive};
use std::pin::Pin;

use crate::{MultipartError, MultipartResult};

/// Stream of bytes for part content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Backend-assigned identifier of an open multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(pub String);

impl UploadId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UploadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UploadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Immutable size/part layout of a multipart upload.
///
/// Every part is `part_size` bytes except the last, which carries the
/// remainder and is always in `1..=part_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    size: u64,
    part_size: u64,
    part_count: u32,
}

impl UploadPlan {
    /// Plan an upload of `size` bytes cut into `part_size` pieces
    pub fn new(size: u64, part_size: u64) -> MultipartResult<Self> {
        if size == 0 {
            return Err(MultipartError::validation("upload size must be greater than zero"));
        }
        if part_size == 0 {
            return Err(MultipartError::validation("part size must be greater than zero"));
        }

        let part_count = u32::try_from(size.div_ceil(part_size)).map_err(|_| {
            MultipartError::validation(format!(
                "size {} with part size {} needs more than {} parts",
                size,
                part_size,
                u32::MAX
            ))
        })?;

        Ok(Self {
            size,
            part_size,
            part_count,
        })
    }

    /// Plan an upload of `size` bytes cut into exactly `parts` pieces
    pub fn with_part_count(size: u64, parts: u32) -> MultipartResult<Self> {
        if parts == 0 {
            return Err(MultipartError::validation("part count must be greater than zero"));
        }
        let plan = Self::new(size, size.div_ceil(u64::from(parts)))?;
        plan.expect_parts(parts)?;
        Ok(plan)
    }

    /// Check that a caller-declared part count agrees with this plan
    pub fn expect_parts(&self, parts: u32) -> MultipartResult<()> {
        if parts != self.part_count {
            return Err(MultipartError::validation(format!(
                "{} parts declared but size {} with part size {} yields {} parts",
                parts, self.size, self.part_size, self.part_count
            )));
        }
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    pub fn last_part_len(&self) -> u64 {
        self.size - self.part_size * u64::from(self.part_count - 1)
    }

    /// Whether `part_number` is one of the declared parts
    pub fn contains(&self, part_number: u32) -> bool {
        (1..=self.part_count).contains(&part_number)
    }

    /// Expected byte length of a part, `None` when out of range
    pub fn part_len(&self, part_number: u32) -> Option<u64> {
        if !self.contains(part_number) {
            return None;
        }
        if part_number == self.part_count {
            Some(self.last_part_len())
        } else {
            Some(self.part_size)
        }
    }

    /// Byte range of the final object covered by a part
    pub fn part_range(&self, part_number: u32) -> Option<Range<u64>> {
        let len = self.part_len(part_number)?;
        let start = self.part_size * u64::from(part_number - 1);
        Some(start..start + len)
    }

    pub fn part_numbers(&self) -> RangeInclusive<u32> {
        1..=self.part_count
    }
}

/// Upload parameters handed back to callers after initialization.
///
/// Serialized with the camelCase names clients exchange (`uploadId`,
/// `partSize`, `parts`, `size`, `key`) so it can round-trip through a client
/// and be passed back to links/commit/abort as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub upload_id: UploadId,
    pub key: String,
    pub size: u64,
    pub part_size: u64,
    pub parts: u32,
}

impl UploadMetadata {
    pub fn new(upload_id: UploadId, key: String, plan: &UploadPlan) -> Self {
        Self {
            upload_id,
            key,
            size: plan.size(),
            part_size: plan.part_size(),
            parts: plan.part_count(),
        }
    }

    /// Rebuild the plan, rejecting metadata that was tampered with in transit
    pub fn plan(&self) -> MultipartResult<UploadPlan> {
        let plan = UploadPlan::new(self.size, self.part_size)?;
        plan.expect_parts(self.parts)?;
        Ok(plan)
    }

    pub fn to_json(&self) -> MultipartResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> MultipartResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A part the backend has durably stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    pub part_number: u32,
    pub etag: String,
    /// Size reported by the backend, when it reports one
    pub size: Option<u64>,
}

impl PartRecord {
    pub fn new<S: Into<String>>(part_number: u32, etag: S, size: Option<u64>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
            size,
        }
    }
}
