//! Upload credential decoding
//!
//! The bucket auth endpoint hands out a colon-delimited bundle
//! `sessionToken:accessKeyId:secretAccessKey:info`, where `info` is a
//! base64 encoded JSON object describing the target bucket.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bucket description carried in the `info` segment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketInfo {
    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Object key prefix, with surrounding slashes
    #[serde(default)]
    pub preprefix: Option<String>,
}

impl BucketInfo {
    /// Decode the base64 JSON blob, padding it to a multiple of four first
    pub fn decode(info: &str) -> Result<Self> {
        let trimmed = info.trim().trim_end_matches('=');
        let mut padded = trimmed.to_string();
        padded.push_str(&"=".repeat((4 - trimmed.len() % 4) % 4));

        let raw = STANDARD
            .decode(padded.as_bytes())
            .map_err(|e| Error::Credential(format!("info is not valid base64: {e}")))?;
        let info: BucketInfo = serde_json::from_slice(&raw)
            .map_err(|e| Error::Credential(format!("info is not valid JSON: {e}")))?;
        tracing::debug!(?info, "decoded bucket info");
        Ok(info)
    }
}

/// Temporary credentials scoped to one bucket prefix
///
/// Immutable after decoding.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub session_token: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    /// Prefix with leading and trailing slashes stripped, never empty
    pub prefix: String,
}

impl Credentials {
    /// Decode credentials from the raw key material and the `info` blob
    pub fn decode(
        session_token: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        info: &str,
    ) -> Result<Self> {
        let decoded = BucketInfo::decode(info)?;
        let prefix = decoded
            .preprefix
            .as_deref()
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();

        let (Some(bucket), Some(region)) = (decoded.bucket.clone(), decoded.region.clone()) else {
            return Err(Error::Credential(format!("{decoded:?}")));
        };
        if prefix.is_empty() {
            return Err(Error::Credential(format!("{decoded:?}")));
        }

        Ok(Self {
            session_token: session_token.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            bucket,
            region,
            prefix,
        })
    }

    /// Parse a full `sessionToken:accessKeyId:secretAccessKey:info` bundle
    pub fn from_bundle(bundle: &str) -> Result<Self> {
        let parts: Vec<&str> = bundle.trim().splitn(4, ':').collect();
        match parts.as_slice() {
            [token, ak, sk, info] if !ak.is_empty() && !info.is_empty() => {
                Self::decode(*token, *ak, *sk, info)
            }
            _ => Err(Error::Credential(
                "expected sessionToken:accessKeyId:secretAccessKey:info".into(),
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
