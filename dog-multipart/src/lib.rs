//! # dog-multipart: Multipart upload coordination for S3-compatible stores
//!
//! `dog-multipart` runs the lifecycle of large-object uploads where clients
//! push parts straight to storage over presigned links, and the server only
//! plans, tracks and commits.
//!
//! ## Key Features
//!
//! - **Planned layout**: size and part size (or part count) are fixed up front and validated against S3 limits
//! - **Presigned links**: one PUT link per part, generated with bounded concurrency
//! - **Authoritative ledger**: confirmed parts are read back from the store, paginating to exhaustion
//! - **Safe commit**: refuses to complete while any declared part is missing, and stays resumable
//! - **Storage agnostic**: S3 through the AWS SDK, plus an in-memory backend for tests and local runs
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_multipart::prelude::*;
//! use bytes::Bytes;
//!
//! # #[tokio::main]
//! # async fn main() -> MultipartResult<()> {
//! let store = MemoryMultipartStore::new("uploads");
//! let manager = UploadManager::new(store, MultipartConfig::default());
//!
//! // 1. Plan the upload: 12 MiB in 7 MiB parts
//! let request = UploadRequest::new("videos/intro.mp4", 12 << 20).with_part_size(7 << 20);
//! let metadata = manager.initialize_upload(request).await?;
//!
//! // 2. Hand out links (clients PUT parts directly) or push parts from here
//! let links = manager.links(&metadata).await?;
//! assert_eq!(links.len(), 2);
//!
//! let session = manager.open(&metadata)?;
//! session.upload_part(1, Bytes::from(vec![0u8; 7 << 20])).await?;
//! session.upload_part(2, Bytes::from(vec![0u8; 5 << 20])).await?;
//!
//! // 3. Commit once every declared part is confirmed
//! let receipt = manager.commit_upload(&metadata).await?;
//! assert_eq!(receipt.size_bytes, 12 << 20);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  UploadManager   │  ← initialize / open / commit / abort
//! ├──────────────────┤
//! │ MultipartSession │  ← parts, links, ledger, commit checks
//! ├──────────────────┤
//! │  MultipartStore  │  ← S3 primitives
//! └──────────────────┘
//! ```
//!
//! The manager holds no per-upload state. Everything needed to resume an
//! upload travels in [`UploadMetadata`], and the store is the source of
//! truth for which parts have landed.

mod config;
mod error;
mod ledger;
mod links;
mod manager;
mod memory_store;
mod receipt;
mod s3_store;
mod session;
pub mod store;
mod types;

// Re-export main types for clean API
pub use config::{MultipartConfig, RetryPolicy, S3_MAX_PARTS, S3_MIN_PART_SIZE};
pub use error::{MultipartError, MultipartResult};
pub use ledger::{PageStream, PartLedger, RecordStream};
pub use links::{LinkGenerator, PresignedLink};
pub use manager::{UploadManager, UploadRequest};
pub use memory_store::{MemoryMultipartStore, DEFAULT_LIST_PAGE_SIZE};
pub use receipt::UploadReceipt;
pub use s3_store::{S3Config, S3MultipartStore};
pub use session::MultipartSession;
pub use store::{CompletedPart, MultipartStore, ObjectDescriptor, PartsPage, StoreCapabilities};
pub use types::{ByteStream, PartRecord, UploadId, UploadMetadata, UploadPlan};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        MemoryMultipartStore, MultipartConfig, MultipartError, MultipartResult, MultipartSession,
        MultipartStore, PartRecord, PresignedLink, UploadId, UploadManager, UploadMetadata,
        UploadReceipt, UploadRequest,
    };
}
