use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    ByteStream, CompletedPart, LinkGenerator, MultipartConfig, MultipartError, MultipartResult,
    MultipartStore, PartLedger, PartRecord, PresignedLink, UploadId, UploadMetadata, UploadPlan,
    UploadReceipt,
};

/// Handle on one open multipart upload.
///
/// The session holds no mutable state: the backend is the only record of
/// which parts have landed, so handles are cheap to clone and safe to use
/// from many tasks at once.
#[derive(Clone)]
pub struct MultipartSession {
    store: Arc<dyn MultipartStore>,
    config: Arc<MultipartConfig>,
    key: String,
    upload_id: UploadId,
    plan: Option<UploadPlan>,
}

impl MultipartSession {
    pub(crate) fn new(
        store: Arc<dyn MultipartStore>,
        config: Arc<MultipartConfig>,
        key: String,
        upload_id: UploadId,
        plan: Option<UploadPlan>,
    ) -> Self {
        Self {
            store,
            config,
            key,
            upload_id,
            plan,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &UploadId {
        &self.upload_id
    }

    /// Declared layout, when the session was opened from upload metadata
    pub fn plan(&self) -> Option<&UploadPlan> {
        self.plan.as_ref()
    }

    pub fn metadata(&self) -> Option<UploadMetadata> {
        self.plan
            .as_ref()
            .map(|plan| UploadMetadata::new(self.upload_id.clone(), self.key.clone(), plan))
    }

    /// Ledger over this upload's confirmed parts
    pub fn ledger(&self) -> PartLedger {
        PartLedger::new(self.store.clone(), self.key.clone(), self.upload_id.clone(), &self.config)
    }

    fn require_plan(&self, operation: &str) -> MultipartResult<&UploadPlan> {
        self.plan.as_ref().ok_or_else(|| {
            MultipartError::validation(format!(
                "{} needs the declared part layout; open the session from upload metadata",
                operation
            ))
        })
    }

    fn check_part(&self, part_number: u32, len: u64) -> MultipartResult<()> {
        match &self.plan {
            Some(plan) => match plan.part_len(part_number) {
                None => Err(MultipartError::validation(format!(
                    "part {} is outside the declared range 1..={} of upload {}",
                    part_number,
                    plan.part_count(),
                    self.upload_id
                ))),
                Some(expected) if expected != len => Err(MultipartError::validation(format!(
                    "part {} of upload {} must be {} bytes, got {}",
                    part_number, self.upload_id, expected, len
                ))),
                Some(_) => Ok(()),
            },
            None if part_number == 0 || part_number > self.config.max_parts => {
                Err(MultipartError::validation(format!(
                    "part {} is outside the allowed range 1..={}",
                    part_number, self.config.max_parts
                )))
            }
            None => Ok(()),
        }
    }

    /// Presigned links for every declared part
    pub async fn links(&self) -> MultipartResult<Vec<PresignedLink>> {
        let plan = self.require_plan("links")?;
        LinkGenerator::new(self.store.clone(), &self.config)
            .links(&self.key, &self.upload_id, plan.part_count())
            .await
    }

    /// Upload one part directly, bypassing presigned links
    #[instrument(skip(self, body), fields(upload_id = %self.upload_id, len = body.len()))]
    pub async fn upload_part(&self, part_number: u32, body: Bytes) -> MultipartResult<PartRecord> {
        self.check_part(part_number, body.len() as u64)?;

        let record = self
            .store
            .put_part(&self.key, &self.upload_id, part_number, body)
            .await
            .map_err(|err| err.for_upload(self.upload_id.as_str()).for_part(part_number))?;

        debug!(upload_id = %self.upload_id, part_number, etag = %record.etag, "part uploaded");
        Ok(record)
    }

    /// Drain a byte stream into one part
    pub async fn upload_part_stream(
        &self,
        part_number: u32,
        mut stream: ByteStream,
    ) -> MultipartResult<PartRecord> {
        let mut body = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        self.upload_part(part_number, body.freeze()).await
    }

    /// Upload many parts with at most `concurrency` in flight.
    ///
    /// Returns the records sorted by part number. The first failure stops the
    /// batch; parts that already landed stay uploaded.
    pub async fn upload_parts<I>(&self, parts: I, concurrency: usize) -> MultipartResult<Vec<PartRecord>>
    where
        I: IntoIterator<Item = (u32, Bytes)>,
        I::IntoIter: Send,
    {
        let mut records: Vec<PartRecord> = stream::iter(parts)
            .map(|(part_number, body)| self.upload_part(part_number, body))
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;
        records.sort_by_key(|record| record.part_number);
        Ok(records)
    }

    /// Parts the backend has confirmed, sorted by part number
    pub async fn get_parts(&self, expected_count: Option<u32>) -> MultipartResult<Vec<PartRecord>> {
        self.ledger().get_parts(expected_count).await
    }

    /// Whole-content overwrite is refused: the part protocol must not be bypassed
    pub async fn set_content(&self, _content: Bytes) -> MultipartResult<()> {
        Err(MultipartError::not_supported("set_content"))
    }

    /// Finalize the upload once every declared part is confirmed.
    ///
    /// Completeness is judged on a fresh, fully paginated ledger query. A
    /// refused commit leaves the backend untouched so the upload can resume.
    #[instrument(skip(self), fields(upload_id = %self.upload_id, key = %self.key))]
    pub async fn commit(&self) -> MultipartResult<UploadReceipt> {
        let plan = *self.require_plan("commit")?;
        let confirmed = self.ledger().snapshot(Some(plan.part_count())).await?;

        let missing: Vec<u32> = plan
            .part_numbers()
            .filter(|part_number| !confirmed.contains_key(part_number))
            .collect();
        let confirmed_count = u32::try_from(confirmed.len()).unwrap_or(u32::MAX);

        if !missing.is_empty() || confirmed_count < plan.part_count() {
            warn!(
                upload_id = %self.upload_id,
                confirmed = confirmed_count,
                expected = plan.part_count(),
                "commit refused, upload incomplete"
            );
            return Err(MultipartError::IncompleteUpload {
                upload_id: self.upload_id.to_string(),
                expected: plan.part_count(),
                confirmed: confirmed_count,
                missing,
            });
        }

        for record in confirmed.values() {
            if let (Some(actual), Some(expected)) = (record.size, plan.part_len(record.part_number)) {
                if actual != expected {
                    return Err(MultipartError::validation(format!(
                        "part {} of upload {} holds {} bytes but {} were declared",
                        record.part_number, self.upload_id, actual, expected
                    )));
                }
            }
        }

        // BTreeMap iteration gives ascending part numbers, as CompleteMultipartUpload requires
        let parts: Vec<CompletedPart> = confirmed.values().map(CompletedPart::from).collect();
        let object = self
            .store
            .complete_upload(&self.key, &self.upload_id, &parts)
            .await
            .map_err(|err| err.for_upload(self.upload_id.as_str()))?;

        let metadata = UploadMetadata::new(self.upload_id.clone(), self.key.clone(), &plan);
        let receipt = UploadReceipt::new(&metadata, object);
        info!(
            upload_id = %self.upload_id,
            key = %self.key,
            parts = plan.part_count(),
            size = receipt.size_bytes,
            "multipart upload committed"
        );
        Ok(receipt)
    }

    /// Discard the upload and everything uploaded under it
    #[instrument(skip(self), fields(upload_id = %self.upload_id, key = %self.key))]
    pub async fn abort(&self) -> MultipartResult<()> {
        self.store
            .abort_upload(&self.key, &self.upload_id)
            .await
            .map_err(|err| err.for_upload(self.upload_id.as_str()))?;

        info!(upload_id = %self.upload_id, key = %self.key, "multipart upload aborted");
        Ok(())
    }
}
