//! peg-cos: upload backends for the peg client
//!
//! This crate implements the `Uploader` trait from peg-core three ways:
//! - `CosRawUploader`: the multipart protocol signed by hand over HTTP
//! - `CosSdkUploader`: concurrent multipart upload through aws-sdk-s3
//! - `S3Uploader`: a single streaming `PutObject`
//!
//! It is the only crate that depends on aws-sdk-s3 and reqwest.

pub mod multipart;
pub mod s3;
pub mod sdk;
pub mod strategy;
pub mod transport;

pub use multipart::{CosRawUploader, MultipartSession, slice_count};
pub use s3::S3Uploader;
pub use sdk::{CosSdkUploader, MultipartConfig};
pub use strategy::{Backend, UploaderOptions, UploaderStrategy};
pub use transport::ReqwestTransport;
