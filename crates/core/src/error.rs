//! Error types for peg-core
//!
//! Provides a unified error type that can be converted to appropriate exit codes.

use thiserror::Error;

/// Result type alias for peg-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for peg operations
#[derive(Error, Debug)]
pub enum Error {
    /// Decoded upload credentials are malformed or incomplete
    #[error("Invalid credentials: {0}")]
    Credential(String),

    /// The remote service answered with a non-success status
    #[error("Status code: {status}\n{body}")]
    Request { status: u16, body: String },

    /// A successful response did not carry what the protocol requires
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Unknown uploader backend identifier
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding error
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Transport-level failure: connect, timeout, reset
    #[error("Network error: {0}")]
    Network(String),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Build a request error from a status code and response body
    pub fn request(status: u16, body: impl Into<String>) -> Self {
        Error::Request {
            status,
            body: body.into(),
        }
    }

    /// HTTP status carried by a request error
    pub const fn status(&self) -> Option<u16> {
        match self {
            Error::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_)
            | Error::Config(_)
            | Error::UnsupportedBackend(_)
            | Error::InvalidUrl(_)
            | Error::TomlParse(_) => 2,
            Error::Network(_) => 3,
            Error::Credential(_) | Error::Base64(_) => 4,
            Error::Request { status, .. } => match *status {
                401 | 403 => 4,
                404 => 5,
                _ => 6,
            },
            Error::Io(_) => 5,
            _ => 1,
        }
    }
}
