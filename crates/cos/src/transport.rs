//! reqwest-backed HTTP transport
//!
//! The raw multipart engine talks HTTP only through the `HttpTransport`
//! trait; this is the production implementation.

use async_trait::async_trait;
use peg_core::config::TimeoutConfig;
use peg_core::{Error, HttpRequest, HttpResponse, HttpTransport, Method, Result};

/// HTTP transport using a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the configured timeouts
    pub fn new(timeout: &TimeoutConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.connect())
            .timeout(timeout.request())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response: {e}")))?
            .to_vec();

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status,
            "HTTP exchange"
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
