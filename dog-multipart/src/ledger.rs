//! Backend-confirmed part ledger.
//!
//! ListParts is paginated with a backend-chosen page cap (1000 on AWS and
//! Ceph, unbounded on MinIO). The ledger drives the listing as a lazy page
//! stream until the backend stops returning a continuation marker, so a
//! large upload is never judged on its first page alone.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::{
    MultipartConfig, MultipartError, MultipartResult, MultipartStore, PartRecord, PartsPage,
    RetryPolicy, UploadId,
};

/// Stream of ListParts pages
pub type PageStream = Pin<Box<dyn Stream<Item = MultipartResult<PartsPage>> + Send>>;

/// Stream of confirmed part records, in backend order
pub type RecordStream = Pin<Box<dyn Stream<Item = MultipartResult<PartRecord>> + Send>>;

/// Queries the backend for the parts of one upload
#[derive(Clone)]
pub struct PartLedger {
    store: Arc<dyn MultipartStore>,
    key: String,
    upload_id: UploadId,
    page_size: Option<u32>,
    retry: RetryPolicy,
}

impl PartLedger {
    pub fn new(
        store: Arc<dyn MultipartStore>,
        key: impl Into<String>,
        upload_id: UploadId,
        config: &MultipartConfig,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            upload_id,
            page_size: config.list_page_size,
            retry: config.ledger_retry.clone(),
        }
    }

    pub fn upload_id(&self) -> &UploadId {
        &self.upload_id
    }

    /// Every page of the listing, from the beginning
    pub fn pages(&self) -> PageStream {
        self.pages_from(None)
    }

    /// Every page after `marker`; lets a caller restart an interrupted walk
    pub fn pages_from(&self, marker: Option<String>) -> PageStream {
        let ledger = self.clone();
        Box::pin(async_stream::stream! {
            let mut marker = marker;
            let mut page_no: u32 = 0;
            loop {
                page_no += 1;
                let page = match ledger.fetch_page(marker.as_deref(), page_no).await {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                let next = match ledger.continuation(&page, marker.as_deref()) {
                    Ok(next) => next,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                yield Ok(page);
                match next {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            }
        })
    }

    /// Every confirmed part record, flattened across pages
    pub fn records(&self) -> RecordStream {
        let mut pages = self.pages();
        Box::pin(async_stream::stream! {
            while let Some(page) = pages.next().await {
                match page {
                    Ok(page) => {
                        for record in page.parts {
                            yield Ok(record);
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        })
    }

    /// Confirmed parts keyed by part number.
    ///
    /// With `expected_count`, listing stops at the first page that reaches
    /// that part number (parts are listed in ascending order) and records
    /// numbered above it are dropped.
    pub async fn snapshot(&self, expected_count: Option<u32>) -> MultipartResult<BTreeMap<u32, PartRecord>> {
        let mut parts = BTreeMap::new();
        let mut pages = self.pages();

        while let Some(page) = pages.next().await {
            let page = page?;
            let mut reached_end = false;

            for record in page.parts {
                if record.part_number == 0 {
                    warn!(upload_id = %self.upload_id, "backend listed part number 0, ignoring");
                    continue;
                }
                if let Some(expected) = expected_count {
                    if record.part_number >= expected {
                        reached_end = true;
                    }
                    if record.part_number > expected {
                        warn!(
                            upload_id = %self.upload_id,
                            part_number = record.part_number,
                            expected,
                            "backend listed a part outside the declared range, ignoring"
                        );
                        continue;
                    }
                }
                parts.insert(record.part_number, record);
            }

            if reached_end {
                break;
            }
        }

        debug!(upload_id = %self.upload_id, parts = parts.len(), "ledger snapshot taken");
        Ok(parts)
    }

    /// Confirmed parts sorted by part number
    pub async fn get_parts(&self, expected_count: Option<u32>) -> MultipartResult<Vec<PartRecord>> {
        Ok(self.snapshot(expected_count).await?.into_values().collect())
    }

    async fn fetch_page(&self, marker: Option<&str>, page: u32) -> MultipartResult<PartsPage> {
        let mut attempt = 1;
        loop {
            match self
                .store
                .list_parts(&self.key, &self.upload_id, marker, self.page_size)
                .await
            {
                Ok(result) => {
                    debug!(
                        upload_id = %self.upload_id,
                        page,
                        parts = result.parts.len(),
                        truncated = result.is_truncated,
                        "ledger page fetched"
                    );
                    return Ok(result);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        upload_id = %self.upload_id,
                        page,
                        attempt,
                        ?delay,
                        error = %err,
                        "ledger page fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Marker for the next request, refusing listings that would never end
    fn continuation(&self, page: &PartsPage, current: Option<&str>) -> MultipartResult<Option<String>> {
        if !page.is_truncated {
            return Ok(None);
        }
        match page.next_marker.as_deref() {
            None | Some("") => Err(MultipartError::backend_message(
                "list_parts",
                "listing is truncated but carries no continuation marker",
            )
            .for_upload(self.upload_id.as_str())),
            Some(next) if Some(next) == current => Err(MultipartError::backend_message(
                "list_parts",
                format!("continuation marker {} did not advance", next),
            )
            .for_upload(self.upload_id.as_str())),
            Some(next) => Ok(Some(next.to_string())),
        }
    }
}
