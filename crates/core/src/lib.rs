//! peg-core: Core library for the peg upload client
//!
//! This crate provides the SDK-independent pieces of peg:
//! - Credential bundle decoding
//! - COS request signing
//! - Configuration management
//! - Remote path normalization
//! - The Uploader and HttpTransport traits
//!
//! Concrete backends live in peg-cos, so this crate can be tested without
//! any network client.

pub mod config;
pub mod credentials;
pub mod error;
pub mod path;
pub mod signer;
pub mod traits;

pub use config::{Config, ConfigManager};
pub use credentials::{BucketInfo, Credentials};
pub use error::{Error, Result};
pub use path::{UploadTarget, key_split, normalize_dir, object_key};
pub use signer::SignedRequest;
pub use traits::{
    HttpRequest, HttpResponse, HttpTransport, Method, NoProgress, ProgressEvent,
    ProgressObserver, UploadOutcome, Uploader,
};
