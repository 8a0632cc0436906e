use thiserror::Error;

/// Result type for multipart operations
pub type MultipartResult<T> = Result<T, MultipartError>;

/// Errors that can occur while coordinating a multipart upload
#[derive(Error, Debug)]
pub enum MultipartError {
    /// Caller-supplied parameters violate the size/part invariants
    #[error("Invalid upload parameters: {message}")]
    Validation { message: String },

    /// Commit attempted before every declared part was confirmed by the backend
    #[error(
        "Upload {upload_id} is incomplete: {confirmed} of {expected} parts confirmed (missing: {})",
        format_missing(.missing)
    )]
    IncompleteUpload {
        upload_id: String,
        expected: u32,
        confirmed: u32,
        missing: Vec<u32>,
    },

    #[error("Operation not supported for multipart uploads: {operation}")]
    NotSupported { operation: String },

    /// Upload identifier unknown to the backend (never created, committed or aborted)
    #[error("Multipart upload not found: {upload_id}")]
    NotFound { upload_id: String },

    #[error("Storage backend error during {context}{}: {source}", format_scope(.upload_id, .part_number))]
    Backend {
        context: String,
        upload_id: Option<String>,
        part_number: Option<u32>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

fn format_missing(missing: &[u32]) -> String {
    const SHOWN: usize = 10;
    let mut out = missing
        .iter()
        .take(SHOWN)
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if missing.len() > SHOWN {
        out.push_str(&format!(" and {} more", missing.len() - SHOWN));
    }
    out
}

fn format_scope(upload_id: &Option<String>, part_number: &Option<u32>) -> String {
    match (upload_id, part_number) {
        (Some(id), Some(n)) => format!(" (upload {}, part {})", id, n),
        (Some(id), None) => format!(" (upload {})", id),
        (None, Some(n)) => format!(" (part {})", n),
        (None, None) => String::new(),
    }
}

impl MultipartError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not supported error for the named operation
    pub fn not_supported<S: Into<String>>(operation: S) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(upload_id: S) -> Self {
        Self::NotFound {
            upload_id: upload_id.into(),
        }
    }

    /// Create a backend error from any error type
    pub fn backend<C, E>(context: C, error: E) -> Self
    where
        C: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            context: context.into(),
            upload_id: None,
            part_number: None,
            source: Box::new(error),
        }
    }

    /// Create a backend error from a plain message
    pub fn backend_message<C: Into<String>, S: Into<String>>(context: C, message: S) -> Self {
        let message: String = message.into();
        Self::Backend {
            context: context.into(),
            upload_id: None,
            part_number: None,
            source: message.into(),
        }
    }

    /// Attach the upload identifier to a backend error
    pub fn for_upload<S: Into<String>>(mut self, id: S) -> Self {
        if let Self::Backend { upload_id, .. } = &mut self {
            *upload_id = Some(id.into());
        }
        self
    }

    /// Attach the part number to a backend error
    pub fn for_part(mut self, number: u32) -> Self {
        if let Self::Backend { part_number, .. } = &mut self {
            *part_number = Some(number);
        }
        self
    }

    /// Whether the caller may reasonably retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Io { .. })
    }

    /// Whether the upload is still open and can be resumed by uploading more parts
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::IncompleteUpload { .. })
    }
}
