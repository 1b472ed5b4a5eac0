//! Configuration management
//!
//! This module handles loading and saving the peg configuration file.
//! The configuration file is stored in TOML format at ~/.config/peg/config.toml,
//! or under `$PEG_CONFIG_DIR` when that variable is set.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "PEG_CONFIG_DIR";

/// Backend used when nothing else is configured
pub const DEFAULT_BACKEND: &str = "cos-raw";

/// Default part size for SDK multipart uploads: 8 MiB
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Default number of concurrent part uploads
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub timeout: TimeoutConfig,
}

/// Default settings for CLI behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Output format: "human" or "json"
    #[serde(default = "default_output")]
    pub output: String,

    /// Show progress bars
    #[serde(default = "default_true")]
    pub progress: bool,

    /// Uploader backend: "cos-sdk", "cos-raw" or "s3"
    #[serde(default = "default_backend")]
    pub backend: String,
}

/// Upload tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Object-store endpoint, e.g. `https://bucket-123.cos.ap-shanghai.myqcloud.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Part size for SDK multipart uploads
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Concurrent part uploads for the SDK backend
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Issue the existence probe before initiating a raw multipart upload
    #[serde(default = "default_true")]
    pub probe: bool,
}

/// Network timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// Whole-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,
}

fn default_output() -> String {
    "human".to_string()
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_true() -> bool {
    true
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    60000
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            progress: true,
            backend: default_backend(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            part_size: default_part_size(),
            concurrency: default_concurrency(),
            probe: true,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            request_ms: default_request_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            upload: UploadConfig::default(),
            timeout: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Validate values that serde cannot check
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.upload.endpoint {
            url::Url::parse(endpoint)?;
        }
        if self.upload.concurrency == 0 {
            return Err(Error::Config("upload.concurrency must be at least 1".into()));
        }
        if self.upload.part_size == 0 {
            return Err(Error::Config("upload.part_size must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager for the default location
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("peg"),
        };
        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// A missing file yields the default configuration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade peg.",
                config.schema_version, SCHEMA_VERSION
            )));
        }
        config.schema_version = SCHEMA_VERSION;
        config.validate()?;

        tracing::debug!(path = %self.config_path.display(), "loaded configuration");
        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Sets file permissions to 600 (owner read/write only).
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        Ok(())
    }
}
