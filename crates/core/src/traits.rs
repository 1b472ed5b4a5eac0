//! Uploader and transport trait definitions
//!
//! These traits decouple the upload engines from any concrete HTTP client or
//! storage SDK, so the CLI can swap backends and tests can script responses.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::UploadTarget;

/// HTTP methods used by the object-store protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL without query string
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.headers.push((key.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Look up a query parameter by name
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a header by case-insensitive name
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Sends HTTP requests on behalf of an upload engine
///
/// Non-success statuses are returned as responses, not errors; only
/// transport failures (connect, timeout) are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Progress report emitted while uploading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub label: String,
    /// Completed fraction in `[0, 1]`
    pub fraction: f64,
}

impl ProgressEvent {
    pub fn new(label: impl Into<String>, fraction: f64) -> Self {
        Self {
            label: label.into(),
            fraction: fraction.clamp(0.0, 1.0),
        }
    }
}

/// Receives progress events from an uploader
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Observer that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Result of a committed upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Object key inside the bucket
    pub key: String,

    pub size_bytes: u64,

    /// Number of parts the object was sent in
    pub parts: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Raw confirmation payload returned by the store, if any
    #[serde(skip_serializing_if = "String::is_empty")]
    pub response: String,
}

impl UploadOutcome {
    pub fn size_human(&self) -> String {
        humansize::format_size(self.size_bytes, humansize::BINARY)
    }
}

/// Capability shared by every upload backend
///
/// Implementations are constructed from the same credential bundle and take
/// the same arguments, so callers can swap them freely.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `target` into `remote_path` (a directory under the credential prefix)
    async fn upload(
        &self,
        target: &UploadTarget,
        remote_path: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<UploadOutcome>;
}
