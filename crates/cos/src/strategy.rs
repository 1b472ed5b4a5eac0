//! Backend selection
//!
//! Maps a backend identifier to one of the three uploaders. All of them are
//! built from the same credential bundle and expose the same `Uploader`
//! interface, so callers never branch on the backend after construction.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use peg_core::config::TimeoutConfig;
use peg_core::{
    Config, Credentials, Error, HttpTransport, ProgressObserver, Result, UploadOutcome,
    UploadTarget, Uploader,
};

use crate::multipart::CosRawUploader;
use crate::s3::S3Uploader;
use crate::sdk::{CosSdkUploader, MultipartConfig, default_endpoint};
use crate::transport::ReqwestTransport;

/// Available uploader backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Vendor SDK multipart upload, concurrent parts
    CosSdk,
    /// Hand-signed multipart protocol, sequential 2 MiB slices
    CosRaw,
    /// Single streaming call against an S3-compatible endpoint
    S3,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::CosSdk, Backend::CosRaw, Backend::S3];

    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::CosSdk => "cos-sdk",
            Backend::CosRaw => "cos-raw",
            Backend::S3 => "s3",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Backend::ALL
            .into_iter()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| Error::UnsupportedBackend(s.to_string()))
    }
}

/// Settings shared by every backend
#[derive(Debug, Clone)]
pub struct UploaderOptions {
    /// Endpoint override; each backend derives a default from the region
    pub endpoint: Option<String>,
    pub multipart: MultipartConfig,
    /// Probe before initiating (raw backend only)
    pub probe: bool,
    pub timeout: TimeoutConfig,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl UploaderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.upload.endpoint.clone(),
            multipart: MultipartConfig::new()
                .part_size(config.upload.part_size)
                .concurrency(config.upload.concurrency),
            probe: config.upload.probe,
            timeout: config.timeout.clone(),
        }
    }

    /// Endpoint a backend will talk to for these credentials
    pub fn endpoint_for(&self, backend: Backend, credentials: &Credentials) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }
        match backend {
            Backend::CosRaw => format!(
                "https://{}.cos.{}.myqcloud.com",
                credentials.bucket, credentials.region
            ),
            Backend::CosSdk | Backend::S3 => default_endpoint(&credentials.region),
        }
    }
}

/// One of the three uploaders, chosen at runtime
pub enum UploaderStrategy {
    CosSdk(CosSdkUploader),
    CosRaw(CosRawUploader),
    S3(S3Uploader),
}

impl UploaderStrategy {
    /// Decode `bundle` and build the uploader for `backend`
    ///
    /// Fails with a credential error before any network activity when the
    /// bundle is malformed.
    pub async fn build(backend: Backend, bundle: &str, options: &UploaderOptions) -> Result<Self> {
        let credentials = Credentials::from_bundle(bundle)?;
        Self::from_credentials(backend, credentials, options).await
    }

    pub async fn from_credentials(
        backend: Backend,
        credentials: Credentials,
        options: &UploaderOptions,
    ) -> Result<Self> {
        let endpoint = options.endpoint_for(backend, &credentials);
        url::Url::parse(&endpoint)?;

        let strategy = match backend {
            Backend::CosSdk => UploaderStrategy::CosSdk(
                CosSdkUploader::new(
                    credentials,
                    Some(&endpoint),
                    options.multipart.clone(),
                    &options.timeout,
                )
                .await,
            ),
            Backend::CosRaw => {
                let transport: Arc<dyn HttpTransport> =
                    Arc::new(ReqwestTransport::new(&options.timeout)?);
                UploaderStrategy::CosRaw(
                    CosRawUploader::new(credentials, endpoint, transport)
                        .with_probe(options.probe),
                )
            }
            Backend::S3 => UploaderStrategy::S3(
                S3Uploader::new(credentials, &endpoint, &options.timeout).await,
            ),
        };
        Ok(strategy)
    }

    pub fn backend(&self) -> Backend {
        match self {
            UploaderStrategy::CosSdk(_) => Backend::CosSdk,
            UploaderStrategy::CosRaw(_) => Backend::CosRaw,
            UploaderStrategy::S3(_) => Backend::S3,
        }
    }
}

#[async_trait]
impl Uploader for UploaderStrategy {
    async fn upload(
        &self,
        target: &UploadTarget,
        remote_path: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<UploadOutcome> {
        match self {
            UploaderStrategy::CosSdk(u) => u.upload(target, remote_path, progress).await,
            UploaderStrategy::CosRaw(u) => u.upload(target, remote_path, progress).await,
            UploaderStrategy::S3(u) => u.upload(target, remote_path, progress).await,
        }
    }
}
