//! Raw-protocol multipart upload
//!
//! Drives one file through the COS XML multipart API by hand:
//!
//! ```text
//! probe -> initiate -> upload part 1..N -> complete
//! ```
//!
//! Every step is a single signed HTTP call and the first non-200 answer ends
//! the upload. Parts are read strictly forward from the file and sent one at a
//! time, so at most one slice is held in memory and etags are recorded in
//! part order.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use peg_core::{
    Credentials, Error, HttpRequest, HttpResponse, HttpTransport, Method, ProgressEvent,
    ProgressObserver, Result, SignedRequest, UploadOutcome, UploadTarget, Uploader, object_key,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Nominal slice size: 2 MiB
pub const SLICE_SIZE: u64 = 2 * 1024 * 1024;

/// Storage class requested for new objects
pub const STORAGE_CLASS: &str = "Standard";

/// Width of the upload id window following `<UploadId>`
const UPLOAD_ID_WINDOW: usize = 74;

const UPLOAD_ID_TAG: &str = "<UploadId>";

/// Number of slices a file of `size` bytes is sent in
///
/// `size / SLICE_SIZE` rounded to the nearest integer with exact halves going
/// down, never less than one. Files up to 3 MiB therefore go out as a single
/// slice, and the last slice always takes whatever remains of the file, which
/// can exceed `SLICE_SIZE`.
pub fn slice_count(size: u64) -> u64 {
    ((size + SLICE_SIZE / 2 - 1) / SLICE_SIZE).max(1)
}

/// One uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// State of an in-flight multipart upload
///
/// Owned by a single upload call and consumed by the completion request.
#[derive(Debug, Clone)]
pub struct MultipartSession {
    pub upload_id: String,
    parts: Vec<CompletedPart>,
}

impl MultipartSession {
    pub fn new(upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            parts: Vec::new(),
        }
    }

    /// Number the next part would get
    pub fn next_part_number(&self) -> u32 {
        self.parts.len() as u32 + 1
    }

    /// Record the etag of the next part and return its number
    pub fn record(&mut self, etag: impl Into<String>) -> u32 {
        let part_number = self.next_part_number();
        self.parts.push(CompletedPart {
            part_number,
            etag: etag.into(),
        });
        part_number
    }

    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    /// `CompleteMultipartUpload` manifest listing every part in order
    pub fn completion_body(&self) -> String {
        let parts: String = self
            .parts
            .iter()
            .map(|p| {
                format!(
                    "<Part><PartNumber>{}</PartNumber><ETag>&quot;{}&quot;</ETag></Part>",
                    p.part_number, p.etag
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<CompleteMultipartUpload>{parts}</CompleteMultipartUpload>"
        )
    }
}

/// Extract the upload id from an `InitiateMultipartUpload` response
///
/// The id is taken from a fixed-width window after the opening tag; the
/// window is cut at the next `<` so shorter ids do not drag markup along.
pub fn parse_upload_id(body: &str) -> Result<String> {
    let start = body
        .find(UPLOAD_ID_TAG)
        .map(|i| i + UPLOAD_ID_TAG.len())
        .ok_or_else(|| Error::MalformedResponse(format!("no {UPLOAD_ID_TAG} in: {body}")))?;

    let window: String = body[start..].chars().take(UPLOAD_ID_WINDOW).collect();
    let upload_id = match window.find('<') {
        Some(end) => &window[..end],
        None => window.as_str(),
    };

    if upload_id.is_empty() {
        return Err(Error::MalformedResponse("empty upload id".into()));
    }
    Ok(upload_id.to_string())
}

/// `content-md5` value: base64 of the MD5 digest
pub fn content_md5(body: &[u8]) -> String {
    STANDARD.encode(Md5::digest(body))
}

fn etag_of(response: &HttpResponse, part_number: u32) -> Result<String> {
    response
        .header("etag")
        .map(|etag| etag.trim_matches('"').to_string())
        .ok_or_else(|| Error::MalformedResponse(format!("part {part_number} returned no Etag")))
}

fn completion_etag(body: &str) -> Option<String> {
    let start = body.find("<ETag>")? + "<ETag>".len();
    let end = body[start..].find("</ETag>")? + start;
    Some(
        body[start..end]
            .replace("&quot;", "")
            .trim_matches('"')
            .to_string(),
    )
}

/// Fail when the file has more than `size` bytes
async fn ensure_eof<R: AsyncRead + Unpin>(reader: &mut R, size: u64) -> Result<()> {
    let mut extra = [0u8; 1];
    if reader.read(&mut extra).await? != 0 {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("file grew past {size} bytes during upload"),
        )));
    }
    Ok(())
}

fn ensure_ok(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_ok() {
        Ok(response)
    } else {
        Err(Error::request(response.status, response.text()))
    }
}

/// Uploader that speaks the multipart protocol directly
pub struct CosRawUploader {
    credentials: Credentials,
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
    probe: bool,
}

impl CosRawUploader {
    /// Create an uploader against `endpoint` (scheme and host, no path)
    pub fn new(
        credentials: Credentials,
        endpoint: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        tracing::debug!(
            access_key_id = %credentials.access_key_id,
            %endpoint,
            "raw COS uploader ready"
        );
        Self {
            credentials,
            endpoint,
            transport,
            probe: true,
        }
    }

    /// Enable or disable the existence probe before initiating
    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: &SignedRequest) -> String {
        request.authorization(
            &self.credentials.access_key_id,
            &self.credentials.secret_access_key,
        )
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.transport.send(request).await?;
        tracing::debug!(status = response.status, body = %response.text(), "response");
        ensure_ok(response)
    }

    async fn probe(&self, key: &str, name: &str) -> Result<()> {
        let signed = SignedRequest::new("get", "/")
            .query("uploads", "")
            .query("prefix", key);
        let content_type = mime_guess::from_path(name).first_or_octet_stream();

        let request = HttpRequest::new(Method::Get, self.endpoint.as_str())
            .query("uploads", "")
            .query("prefix", key)
            .header("content-type", content_type.essence_str())
            .header("authorization", self.authorize(&signed))
            .header("x-cos-security-token", &self.credentials.session_token)
            .header("x-cos-storage-class", STORAGE_CLASS);

        self.send(request).await.map(|_| ())
    }

    async fn initiate(&self, key: &str) -> Result<MultipartSession> {
        let path = format!("/{key}");
        let signed = SignedRequest::new("post", path.as_str())
            .query("uploads", "")
            .header("x-cos-storage-class", STORAGE_CLASS);

        let request = HttpRequest::new(Method::Post, self.object_url(key))
            .query("uploads", "")
            .header("authorization", self.authorize(&signed))
            .header("x-cos-security-token", &self.credentials.session_token)
            .header("x-cos-storage-class", STORAGE_CLASS);

        let response = self.send(request).await?;
        let upload_id = parse_upload_id(&response.text())?;
        tracing::debug!(%upload_id, %key, "multipart upload initiated");
        Ok(MultipartSession::new(upload_id))
    }

    async fn upload_part(
        &self,
        key: &str,
        session: &MultipartSession,
        part_number: u32,
        chunk: Vec<u8>,
    ) -> Result<String> {
        let path = format!("/{key}");
        let signed = SignedRequest::new("put", path.as_str())
            .query("partnumber", part_number)
            .query("uploadid", &session.upload_id)
            .header("content-length", chunk.len());

        let request = HttpRequest::new(Method::Put, self.object_url(key))
            .query("partnumber", part_number)
            .query("uploadid", &session.upload_id)
            .header("authorization", self.authorize(&signed))
            .header("x-cos-security-token", &self.credentials.session_token)
            .header("content-length", chunk.len())
            .body(chunk);

        let response = self.send(request).await?;
        etag_of(&response, part_number)
    }

    async fn complete(&self, key: &str, session: MultipartSession) -> Result<String> {
        let body = session.completion_body().into_bytes();
        let md5 = content_md5(&body);

        let path = format!("/{key}");
        let signed = SignedRequest::new("post", path.as_str())
            .query("uploadid", &session.upload_id)
            .header("content-md5", &md5);

        let request = HttpRequest::new(Method::Post, self.object_url(key))
            .query("uploadid", &session.upload_id)
            .header("content-type", "application/xml")
            .header("content-md5", &md5)
            .header("authorization", self.authorize(&signed))
            .header("x-cos-security-token", &self.credentials.session_token)
            .body(body);

        Ok(self.send(request).await?.text())
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.endpoint)
    }

    async fn upload_slices(
        &self,
        target: &UploadTarget,
        key: &str,
        size: u64,
        session: &mut MultipartSession,
        progress: &dyn ProgressObserver,
    ) -> Result<()> {
        let slices = slice_count(size);
        let mut file = File::open(&target.local_path).await?;

        for index in 0..slices {
            let last = index == slices - 1;
            let len = if last {
                size - index * SLICE_SIZE
            } else {
                SLICE_SIZE
            };

            // a file that shrank fails here with UnexpectedEof
            let mut chunk = vec![0u8; len as usize];
            file.read_exact(&mut chunk).await?;
            if last {
                ensure_eof(&mut file, size).await?;
            }

            let part_number = session.next_part_number();
            let etag = self.upload_part(key, session, part_number, chunk).await?;
            session.record(etag.as_str());

            progress.on_progress(ProgressEvent::new(
                etag,
                f64::from(part_number) / slices as f64,
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Uploader for CosRawUploader {
    async fn upload(
        &self,
        target: &UploadTarget,
        remote_path: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<UploadOutcome> {
        let key = object_key(&self.credentials.prefix, remote_path, &target.name);

        if self.probe {
            self.probe(&key, &target.name).await?;
        }

        let mut session = self.initiate(&key).await?;

        let uploaded = async {
            let size = target.size_bytes().await?;
            self.upload_slices(target, &key, size, &mut session, progress)
                .await?;
            Ok::<_, Error>(size)
        }
        .await;

        let size = match uploaded {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(
                    upload_id = %session.upload_id,
                    %key,
                    "multipart upload aborted, upload id left on the server"
                );
                return Err(e);
            }
        };

        let parts = session.parts().len();
        let upload_id = session.upload_id.clone();
        let response = self.complete(&key, session).await.inspect_err(|_| {
            tracing::warn!(%upload_id, %key, "completion rejected, upload id left on the server");
        })?;

        progress.on_progress(ProgressEvent::new(key.as_str(), 1.0));
        tracing::info!(%key, size, parts, "upload committed");

        Ok(UploadOutcome {
            etag: completion_etag(&response),
            key,
            size_bytes: size,
            parts,
            response,
        })
    }
}
