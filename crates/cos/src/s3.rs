//! S3-compatible uploader
//!
//! Streams the whole file in one `PutObject` call. For this backend the
//! credential prefix names the bucket, and the object key is the remote
//! directory plus the file name.
//!
//! The request body is a byte-counting reader over the file; the count is
//! published on a watch channel and turned into progress events while the
//! request is in flight.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use aws_smithy_types::byte_stream::ByteStream;
use futures::TryStreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use peg_core::config::TimeoutConfig;
use peg_core::{
    Credentials, ProgressEvent, ProgressObserver, Result, UploadOutcome, UploadTarget, Uploader,
    normalize_dir,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;
use tokio_util::io::ReaderStream;

use crate::sdk::{build_client, map_sdk_error, sdk_timeouts};

/// Reader that publishes its running byte count after every read
pub struct CountingReader<R> {
    inner: R,
    count: u64,
    counter: watch::Sender<u64>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, counter: watch::Sender<u64>) -> Self {
        Self {
            inner,
            count: 0,
            counter,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            if read > 0 {
                self.count += read;
                let count = self.count;
                self.counter.send_replace(count);
            }
        }
        poll
    }
}

/// Streaming SDK body over any reader
pub fn streaming_body<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Unpin + Send + Sync + 'static,
{
    let frames = ReaderStream::new(reader).map_ok(Frame::data);
    ByteStream::from_body_1_x(StreamBody::new(frames))
}

fn fraction(sent: u64, size: u64) -> f64 {
    if size == 0 {
        1.0
    } else {
        sent as f64 / size as f64
    }
}

/// Single-request uploader for generic S3 endpoints
pub struct S3Uploader {
    client: aws_sdk_s3::Client,
    credentials: Credentials,
}

impl S3Uploader {
    pub async fn new(credentials: Credentials, endpoint: &str, timeout: &TimeoutConfig) -> Self {
        tracing::debug!(
            access_key_id = %credentials.access_key_id,
            %endpoint,
            "S3 uploader ready"
        );
        let client =
            build_client(&credentials, endpoint, true, sdk_timeouts(timeout, false)).await;
        Self {
            client,
            credentials,
        }
    }

    /// Object key for a file under `remote_path`
    pub fn key_for(remote_path: &str, name: &str) -> String {
        format!("{}{name}", normalize_dir(remote_path))
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    async fn upload(
        &self,
        target: &UploadTarget,
        remote_path: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<UploadOutcome> {
        let key = Self::key_for(remote_path, &target.name);
        let size = target.size_bytes().await?;
        let content_type = mime_guess::from_path(&target.name).first_or_octet_stream();

        let file = File::open(&target.local_path).await?;
        let (counter, mut sent) = watch::channel(0u64);
        let body = streaming_body(CountingReader::new(file, counter));

        progress.on_progress(ProgressEvent::new(key.as_str(), 0.0));

        let request = self
            .client
            .put_object()
            .bucket(&self.credentials.prefix)
            .key(&key)
            .content_type(content_type.essence_str())
            .content_length(size as i64)
            .body(body)
            .send();
        tokio::pin!(request);

        let output = loop {
            tokio::select! {
                result = &mut request => break result.map_err(map_sdk_error)?,
                changed = sent.changed() => {
                    if changed.is_err() {
                        // body dropped: nothing more to report
                        break (&mut request).await.map_err(map_sdk_error)?;
                    }
                    let bytes = *sent.borrow_and_update();
                    progress
                        .on_progress(ProgressEvent::new(key.as_str(), fraction(bytes, size)));
                }
            }
        };

        progress.on_progress(ProgressEvent::new(key.as_str(), 1.0));
        tracing::info!(%key, size, bucket = %self.credentials.prefix, "upload committed");

        Ok(UploadOutcome {
            etag: output.e_tag().map(|e| e.trim_matches('"').to_string()),
            key,
            size_bytes: size,
            parts: 1,
            response: String::new(),
        })
    }
}
