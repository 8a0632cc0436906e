use std::time::Duration;

use crate::{MultipartError, MultipartResult, UploadPlan};

/// S3 refuses non-final parts smaller than this
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3 refuses part numbers above this
pub const S3_MAX_PARTS: u32 = 10_000;

/// Configuration for multipart coordination
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Part size used when a request names neither a part size nor a part count
    pub default_part_size: u64,

    /// Smallest allowed part size for uploads with more than one part
    pub min_part_size: u64,

    /// Upper bound on the number of parts of one upload
    pub max_parts: u32,

    /// Lifetime of generated presigned part links
    pub link_expiry: Duration,

    /// Presign calls kept in flight when the backend signs remotely
    pub link_concurrency: usize,

    /// `max-parts` sent with each ListParts request (None = backend default)
    pub list_page_size: Option<u32>,

    /// Retry policy for ledger page fetches
    pub ledger_retry: RetryPolicy,

    /// Content type recorded when creating the backend upload
    pub content_type: String,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            default_part_size: 8 * 1024 * 1024, // 8MB
            min_part_size: S3_MIN_PART_SIZE,
            max_parts: S3_MAX_PARTS,
            link_expiry: Duration::from_secs(3600),
            link_concurrency: 16,
            list_page_size: None,
            ledger_retry: RetryPolicy::default(),
            content_type: "application/octet-stream".to_string(),
        }
    }
}

impl MultipartConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_part_size(mut self, bytes: u64) -> Self {
        self.default_part_size = bytes;
        self
    }

    /// Lower the minimum part size (in-process stores and tests)
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    pub fn with_max_parts(mut self, max: u32) -> Self {
        self.max_parts = max;
        self
    }

    pub fn with_link_expiry(mut self, expiry: Duration) -> Self {
        self.link_expiry = expiry;
        self
    }

    pub fn with_link_concurrency(mut self, concurrency: usize) -> Self {
        self.link_concurrency = concurrency.max(1);
        self
    }

    pub fn with_list_page_size(mut self, page_size: u32) -> Self {
        self.list_page_size = Some(page_size);
        self
    }

    pub fn with_ledger_retry(mut self, policy: RetryPolicy) -> Self {
        self.ledger_retry = policy;
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Check a plan against the configured backend limits
    pub fn check_plan(&self, plan: &UploadPlan) -> MultipartResult<()> {
        if plan.part_count() > self.max_parts {
            return Err(MultipartError::validation(format!(
                "{} parts exceeds the maximum of {}",
                plan.part_count(),
                self.max_parts
            )));
        }
        if plan.part_count() > 1 && plan.part_size() < self.min_part_size {
            return Err(MultipartError::validation(format!(
                "part size {} is below the minimum of {}",
                plan.part_size(),
                self.min_part_size
            )));
        }
        Ok(())
    }
}

/// Exponential backoff for idempotent backend reads
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on every further retry
    pub base_delay: Duration,

    /// Cap on a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}
