//! Path handling
//!
//! Remote directories are normalized to the `dir/sub/` form (no leading
//! slash, one trailing slash) before they are joined into object keys.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A local file scheduled for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// File name used as the last key segment
    pub name: String,
    /// Local filesystem path
    pub local_path: PathBuf,
}

impl UploadTarget {
    /// Create a target with an explicit remote name
    pub fn new(name: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            local_path: local_path.into(),
        }
    }

    /// Create a target named after the local file
    pub fn from_path(local_path: impl AsRef<Path>) -> Result<Self> {
        let local_path = local_path.as_ref();
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidPath(local_path.display().to_string()))?;
        Ok(Self::new(name, local_path))
    }

    /// Size of the file, read from the filesystem at call time
    pub async fn size_bytes(&self) -> Result<u64> {
        Ok(tokio::fs::metadata(&self.local_path).await?.len())
    }
}

/// Normalize a remote directory to `a/b/`, or the empty string for the root
pub fn normalize_dir(path: &str) -> String {
    let cleaned = collapse_separators(path);
    let trimmed = cleaned.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Split a key into its directory part and file name
///
/// `images/essay/123/` becomes `("images/essay", "123")`.
pub fn key_split(key: &str) -> (String, String) {
    let cleaned = collapse_separators(key);
    let trimmed = cleaned.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

/// Full object key `prefix/dir/name` inside the bucket
pub fn object_key(prefix: &str, remote_dir: &str, name: &str) -> String {
    let dir = normalize_dir(remote_dir);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{dir}{name}")
    } else {
        format!("{prefix}/{dir}{name}")
    }
}

fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars().map(|c| if c == '\\' { '/' } else { c }) {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}
