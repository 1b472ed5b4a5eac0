//! SDK multipart uploader
//!
//! Uses aws-sdk-s3 against the COS S3-compatible endpoint. Parts are read
//! and sent concurrently, bounded by `MultipartConfig::concurrency`; each
//! part opens its own file handle and carries its part number back with its
//! etag, so the completion list is correct whatever order parts finish in.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse as SdkHttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use futures::{StreamExt, TryStreamExt};
use peg_core::config::TimeoutConfig;
use peg_core::{
    Credentials, Error, ProgressEvent, ProgressObserver, Result, UploadOutcome, UploadTarget,
    Uploader, object_key,
};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Default part size: 8 MiB
pub const DEFAULT_PART_SIZE: u64 = peg_core::config::DEFAULT_PART_SIZE;

/// Minimum part size: 1 MiB (COS requirement)
pub const MIN_PART_SIZE: u64 = 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts: 10,000
pub const MAX_PARTS: u64 = 10_000;

/// Multipart upload configuration
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Part size in bytes
    pub part_size: u64,

    /// Number of concurrent part uploads
    pub concurrency: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: peg_core::config::DEFAULT_CONCURRENCY,
        }
    }
}

impl MultipartConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part_size(mut self, size: u64) -> Self {
        self.part_size = size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Part size for a file, grown when the configured size would exceed
    /// the part limit
    pub fn calculate_part_size(&self, file_size: u64) -> u64 {
        if file_size.div_ceil(self.part_size) <= MAX_PARTS {
            self.part_size
        } else {
            file_size
                .div_ceil(MAX_PARTS)
                .clamp(MIN_PART_SIZE, MAX_PART_SIZE)
        }
    }
}

/// Number of parts for a file; an empty file is still one part
pub fn calculate_parts(file_size: u64, part_size: u64) -> u64 {
    file_size.div_ceil(part_size).max(1)
}

/// Byte range `[start, end)` of a 1-based part
pub fn part_byte_range(part_number: u64, part_size: u64, total_size: u64) -> (u64, u64) {
    let start = ((part_number - 1) * part_size).min(total_size);
    let end = (start + part_size).min(total_size);
    (start, end)
}

/// Map an SDK failure onto a request error when the service answered,
/// a network error otherwise
pub(crate) fn map_sdk_error<E>(err: SdkError<E, SdkHttpResponse>) -> Error
where
    E: std::error::Error + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.raw_response() {
        Some(raw) => Error::request(raw.status().as_u16(), message),
        None => Error::Network(message),
    }
}

/// Default COS S3-compatible endpoint for a region
pub fn default_endpoint(region: &str) -> String {
    format!("https://cos.{region}.myqcloud.com")
}

/// SDK timeouts from the `[timeout]` settings
///
/// The request timeout caps each attempt only when every request body is
/// bounded (one part); a single-call upload of a whole file gets the read
/// timeout instead.
pub(crate) fn sdk_timeouts(
    timeout: &TimeoutConfig,
    bounded_body: bool,
) -> aws_config::timeout::TimeoutConfig {
    let builder = aws_config::timeout::TimeoutConfig::builder()
        .connect_timeout(timeout.connect())
        .read_timeout(timeout.request());
    if bounded_body {
        builder.operation_attempt_timeout(timeout.request()).build()
    } else {
        builder.build()
    }
}

/// Build an S3 client from decoded upload credentials
pub(crate) async fn build_client(
    credentials: &Credentials,
    endpoint: &str,
    force_path_style: bool,
    timeouts: aws_config::timeout::TimeoutConfig,
) -> aws_sdk_s3::Client {
    let provider = aws_credential_types::Credentials::new(
        credentials.access_key_id.clone(),
        credentials.secret_access_key.clone(),
        Some(credentials.session_token.clone()),
        None,
        "peg-upload-token",
    );

    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .credentials_provider(provider)
        .region(aws_config::Region::new(credentials.region.clone()))
        .endpoint_url(endpoint)
        .timeout_config(timeouts)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(force_path_style)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

/// Concurrent multipart uploader backed by the vendor SDK
pub struct CosSdkUploader {
    client: aws_sdk_s3::Client,
    credentials: Credentials,
    config: MultipartConfig,
}

impl CosSdkUploader {
    pub async fn new(
        credentials: Credentials,
        endpoint: Option<&str>,
        config: MultipartConfig,
        timeout: &TimeoutConfig,
    ) -> Self {
        let endpoint = endpoint
            .map(str::to_string)
            .unwrap_or_else(|| default_endpoint(&credentials.region));
        tracing::debug!(
            access_key_id = %credentials.access_key_id,
            %endpoint,
            concurrency = config.concurrency,
            "COS SDK uploader ready"
        );
        let client =
            build_client(&credentials, &endpoint, false, sdk_timeouts(timeout, true)).await;

        Self {
            client,
            credentials,
            config,
        }
    }

    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_part(
        &self,
        target: &UploadTarget,
        key: &str,
        upload_id: &str,
        part_number: u64,
        part_size: u64,
        total_size: u64,
        uploaded: &AtomicU64,
        progress: &dyn ProgressObserver,
    ) -> Result<CompletedPart> {
        let (start, end) = part_byte_range(part_number, part_size, total_size);

        let mut file = File::open(&target.local_path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut chunk = vec![0u8; (end - start) as usize];
        file.read_exact(&mut chunk).await?;

        let output = self
            .client
            .upload_part()
            .bucket(&self.credentials.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(chunk))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let etag = output.e_tag().ok_or_else(|| {
            Error::MalformedResponse(format!("part {part_number} returned no ETag"))
        })?;

        let done = uploaded.fetch_add(end - start, Ordering::Relaxed) + (end - start);
        let fraction = if total_size == 0 {
            1.0
        } else {
            done as f64 / total_size as f64
        };
        progress.on_progress(ProgressEvent::new(format!("part {part_number}"), fraction));

        Ok(CompletedPart::builder()
            .part_number(part_number as i32)
            .e_tag(etag)
            .build())
    }
}

#[async_trait]
impl Uploader for CosSdkUploader {
    async fn upload(
        &self,
        target: &UploadTarget,
        remote_path: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<UploadOutcome> {
        let key = object_key(&self.credentials.prefix, remote_path, &target.name);
        let size = target.size_bytes().await?;
        let part_size = self.config.calculate_part_size(size);
        let part_count = calculate_parts(size, part_size);
        let content_type = mime_guess::from_path(&target.name).first_or_octet_stream();

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.credentials.bucket)
            .key(&key)
            .storage_class(StorageClass::Standard)
            .content_type(content_type.essence_str())
            .send()
            .await
            .map_err(map_sdk_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::MalformedResponse("no upload id in response".into()))?
            .to_string();
        tracing::debug!(%upload_id, %key, part_count, part_size, "multipart upload initiated");

        let uploaded = AtomicU64::new(0);
        let parts = futures::stream::iter(1..=part_count)
            .map(|n| {
                self.upload_part(
                    target, &key, &upload_id, n, part_size, size, &uploaded, progress,
                )
            })
            .buffer_unordered(self.config.concurrency)
            .try_collect::<Vec<_>>()
            .await;

        let mut parts = match parts {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(%upload_id, %key, "multipart upload aborted, upload id left on the server");
                return Err(e);
            }
        };
        parts.sort_by_key(|p| p.part_number());

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.credentials.bucket)
            .key(&key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(map_sdk_error)?;

        progress.on_progress(ProgressEvent::new(key.as_str(), 1.0));
        tracing::info!(%key, size, parts = part_count, "upload committed");

        Ok(UploadOutcome {
            etag: completed.e_tag().map(|e| e.trim_matches('"').to_string()),
            key,
            size_bytes: size,
            parts: part_count as usize,
            response: String::new(),
        })
    }
}
