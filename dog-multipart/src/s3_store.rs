use std::env;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as AwsCompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::{
    CompletedPart, MultipartError, MultipartResult, MultipartStore, ObjectDescriptor, PartRecord,
    PartsPage, PresignedLink, StoreCapabilities, UploadId,
};

/// S3 connection settings
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Path-style addressing; needed by MinIO, Ceph RGW and RustFS
    pub force_path_style: bool,
}

impl S3Config {
    /// Read `S3_ENDPOINT_URL`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY`,
    /// `S3_BUCKET` and optionally `S3_REGION` / `S3_FORCE_PATH_STYLE`
    pub fn from_env() -> MultipartResult<Self> {
        fn get_env(key: &str) -> MultipartResult<String> {
            env::var(key).map_err(|_| MultipartError::validation(format!("{} environment variable required", key)))
        }

        let force_path_style = match env::var("S3_FORCE_PATH_STYLE") {
            Ok(value) => !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no"),
            Err(_) => true,
        };

        Ok(Self {
            endpoint_url: get_env("S3_ENDPOINT_URL")?,
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id: get_env("S3_ACCESS_KEY_ID")?,
            secret_access_key: get_env("S3_SECRET_ACCESS_KEY")?,
            bucket: get_env("S3_BUCKET")?,
            force_path_style,
        })
    }
}

/// Multipart backend speaking the S3 protocol through the AWS SDK
#[derive(Clone)]
pub struct S3MultipartStore {
    client: Client,
    bucket: String,
}

impl S3MultipartStore {
    pub async fn new(config: S3Config) -> Self {
        let bucket = config.bucket.clone();
        let client = Self::create_client(config).await;
        Self { client, bucket }
    }

    pub async fn from_env() -> MultipartResult<Self> {
        Ok(Self::new(S3Config::from_env()?).await)
    }

    /// Wrap an already configured SDK client
    pub fn from_client<S: Into<String>>(client: Client, bucket: S) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    async fn create_client(config: S3Config) -> Client {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "dog-multipart",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url)
            .load()
            .await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Map SDK failures, turning `NoSuchUpload` into `NotFound`
    fn map_sdk_error<E, R>(context: &str, upload_id: Option<&UploadId>, err: SdkError<E, R>) -> MultipartError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
    {
        if err.code() == Some("NoSuchUpload") {
            if let Some(upload_id) = upload_id {
                return MultipartError::not_found(upload_id.as_str());
            }
        }
        let mapped = MultipartError::backend(context, err);
        match upload_id {
            Some(upload_id) => mapped.for_upload(upload_id.as_str()),
            None => mapped,
        }
    }

    fn part_number_i32(part_number: u32) -> MultipartResult<i32> {
        i32::try_from(part_number)
            .map_err(|_| MultipartError::validation(format!("part number {} is out of range", part_number)))
    }
}

#[async_trait]
impl MultipartStore for S3MultipartStore {
    async fn create_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> MultipartResult<UploadId> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key);

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let result = request
            .send()
            .await
            .map_err(|err| Self::map_sdk_error("create_multipart_upload", None, err))?;

        result
            .upload_id()
            .map(UploadId::from)
            .ok_or_else(|| MultipartError::backend_message("create_multipart_upload", "response carried no upload id"))
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        expires_in: Duration,
    ) -> MultipartResult<PresignedLink> {
        // Signing is local; an aborted or completed upload only surfaces when the link is used
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|err| MultipartError::validation(format!("invalid link expiry: {}", err)))?;

        let presigned_request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .part_number(Self::part_number_i32(part_number)?)
            .presigned(presigning_config)
            .await
            .map_err(|err| Self::map_sdk_error("presign_upload_part", Some(upload_id), err))?;

        Ok(PresignedLink::new(
            part_number,
            presigned_request.uri(),
            PresignedLink::expiry_from_now(expires_in),
        ))
    }

    async fn put_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<PartRecord> {
        let size = body.len() as u64;
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .part_number(Self::part_number_i32(part_number)?)
            .content_length(size as i64)
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(|err| Self::map_sdk_error("upload_part", Some(upload_id), err).for_part(part_number))?;

        let etag = result.e_tag().ok_or_else(|| {
            MultipartError::backend_message("upload_part", "response carried no ETag")
                .for_upload(upload_id.as_str())
                .for_part(part_number)
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
        let mut request = self
            .client
            .list_parts()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str());

        if let Some(marker) = marker {
            request = request.part_number_marker(marker);
        }
        if let Some(max_parts) = max_parts {
            request = request.max_parts(i32::try_from(max_parts).unwrap_or(i32::MAX));
        }

        let result = request
            .send()
            .await
            .map_err(|err| Self::map_sdk_error("list_parts", Some(upload_id), err))?;

        // Entries without a number or ETag are not confirmed parts
        let parts = result
            .parts()
            .iter()
            .filter_map(|part| {
                let part_number = u32::try_from(part.part_number()?).ok()?;
                let etag = part.e_tag()?;
                let size = part.size().and_then(|s| u64::try_from(s).ok());
                Some(PartRecord::new(part_number, etag, size))
            })
            .collect();

        Ok(PartsPage {
            parts,
            is_truncated: result.is_truncated().unwrap_or(false),
            next_marker: result.next_part_number_marker().map(str::to_string),
        })
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> MultipartResult<ObjectDescriptor> {
        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            completed.push(
                AwsCompletedPart::builder()
                    .part_number(Self::part_number_i32(part.part_number)?)
                    .e_tag(&part.etag)
                    .build(),
            );
        }

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| Self::map_sdk_error("complete_multipart_upload", Some(upload_id), err))?;

        Ok(ObjectDescriptor {
            key: result.key().unwrap_or(key).to_string(),
            etag: result.e_tag().map(str::to_string),
            size_bytes: None,
        })
    }

    async fn abort_upload(&self, key: &str, upload_id: &UploadId) -> MultipartResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .send()
            .await
            .map_err(|err| Self::map_sdk_error("abort_multipart_upload", Some(upload_id), err))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> MultipartResult<Bytes> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| Self::map_sdk_error("get_object", None, err))?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|err| MultipartError::backend("get_object", err))?;
        Ok(body.into_bytes())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_local_signing()
    }
}
