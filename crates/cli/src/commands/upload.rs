//! upload command - Upload a file or directory
//!
//! Files land under `<prefix>/<path>/` in the bucket named by the credential
//! bundle. Directories are walked recursively and keep their relative layout.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use peg_core::{Config, Credentials, UploadTarget, Uploader as _, object_key};
use peg_cos::{Backend, S3Uploader, UploaderOptions, UploaderStrategy};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, UploadProgress};

/// Upload a file or directory
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Local file or directory
    pub source: PathBuf,

    /// Remote directory under the credential prefix
    #[arg(long, default_value = "")]
    pub path: String,

    /// Credential bundle `token:accessKeyId:secretAccessKey:info`
    #[arg(long, env = "PEG_UPLOAD_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Endpoint override
    #[arg(long, env = "PEG_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Uploader backend: cos-sdk, cos-raw or s3
    #[arg(long)]
    pub backend: Option<String>,

    /// Part size in bytes for the cos-sdk backend
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Concurrent parts for the cos-sdk backend
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Skip the probe request before initiating (cos-raw backend)
    #[arg(long)]
    pub no_probe: bool,

    /// Only show what would be uploaded
    #[arg(long)]
    pub dry_run: bool,

    /// Keep going after a file fails (directory uploads)
    #[arg(long)]
    pub continue_on_error: bool,
}

#[derive(Debug, Serialize)]
struct UploadOutput {
    status: &'static str,
    source: String,
    key: String,
    backend: &'static str,
    size_bytes: u64,
    size_human: String,
    parts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
}

/// A local file and the remote directory it goes to
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedFile {
    local: PathBuf,
    remote_dir: String,
}

/// Execute the upload command
pub async fn execute(args: UploadArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if !args.source.exists() {
        formatter.error(&format!("Source not found: {}", args.source.display()));
        return ExitCode::NotFound;
    }

    let backend_name = args.backend.as_deref().unwrap_or(&config.defaults.backend);
    let backend: Backend = match backend_name.parse() {
        Ok(b) => b,
        Err(e) => {
            formatter.error(&format!("{e} (expected one of: cos-sdk, cos-raw, s3)"));
            return ExitCode::UsageError;
        }
    };

    let credentials = match Credentials::from_bundle(&args.token) {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Invalid upload token: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let files = match plan(&args.source, &args.path) {
        Ok(f) => f,
        Err(e) => {
            formatter.error(&format!("Failed to read {}: {e}", args.source.display()));
            return ExitCode::GeneralError;
        }
    };

    if args.dry_run {
        for file in &files {
            let name = file_name(&file.local);
            let key = planned_key(backend, &credentials, &file.remote_dir, &name);
            formatter.println(&format!("Would upload: {} -> {key}", file.local.display()));
        }
        return ExitCode::Success;
    }

    let options = options_for(&args, config);
    let uploader = match UploaderStrategy::from_credentials(backend, credentials, &options).await {
        Ok(u) => u,
        Err(e) => {
            formatter.error(&format!("Failed to create {backend} uploader: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let mut success_count = 0;
    let mut error_count = 0;
    let mut last_error = ExitCode::Success;

    for file in &files {
        let result = tokio::select! {
            code = upload_file(&uploader, file, &formatter) => code,
            _ = tokio::signal::ctrl_c() => {
                formatter.error("Interrupted");
                return ExitCode::Interrupted;
            }
        };

        if result == ExitCode::Success {
            success_count += 1;
        } else {
            error_count += 1;
            last_error = result;
            if !args.continue_on_error {
                return result;
            }
        }
    }

    if error_count > 0 {
        formatter.warning(&format!(
            "Completed with errors: {success_count} succeeded, {error_count} failed"
        ));
        if files.len() == 1 {
            last_error
        } else {
            ExitCode::GeneralError
        }
    } else {
        if files.len() > 1 {
            formatter.success(&format!("Uploaded {success_count} file(s)."));
        }
        ExitCode::Success
    }
}

async fn upload_file(
    uploader: &UploaderStrategy,
    file: &PlannedFile,
    formatter: &Formatter,
) -> ExitCode {
    let src_display = file.local.display().to_string();

    let target = match UploadTarget::from_path(&file.local) {
        Ok(t) => t,
        Err(e) => {
            formatter.error(&format!("Failed to upload {src_display}: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let progress = UploadProgress::new(formatter.config(), &target.name);
    match uploader.upload(&target, &file.remote_dir, &progress).await {
        Ok(outcome) => {
            progress.finish_and_clear();
            tracing::debug!(key = %outcome.key, response = %outcome.response, "store confirmation");

            if formatter.is_json() {
                let output = UploadOutput {
                    status: "success",
                    source: src_display,
                    size_human: outcome.size_human(),
                    key: outcome.key,
                    backend: uploader.backend().as_str(),
                    size_bytes: outcome.size_bytes,
                    parts: outcome.parts,
                    etag: outcome.etag,
                    response: (!outcome.response.is_empty()).then_some(outcome.response),
                };
                formatter.json(&output);
            } else {
                formatter.println(&format!(
                    "{src_display} -> {} ({}, {} part(s))",
                    outcome.key,
                    outcome.size_human(),
                    outcome.parts
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            progress.abandon();
            formatter.error(&format!("Failed to upload {src_display}: {e}"));
            ExitCode::from_error(&e)
        }
    }
}

/// Uploader options from the config file with command-line overrides applied
fn options_for(args: &UploadArgs, config: &Config) -> UploaderOptions {
    let mut options = UploaderOptions::from_config(config);
    if let Some(endpoint) = &args.endpoint {
        options.endpoint = Some(endpoint.clone());
    }
    if let Some(part_size) = args.part_size {
        options.multipart = options.multipart.part_size(part_size);
    }
    if let Some(concurrency) = args.concurrency {
        options.multipart = options.multipart.concurrency(concurrency);
    }
    options.probe &= !args.no_probe;
    options
}

/// Key an upload would be stored under, without touching the network
fn planned_key(backend: Backend, credentials: &Credentials, remote_dir: &str, name: &str) -> String {
    match backend {
        Backend::S3 => S3Uploader::key_for(remote_dir, name),
        Backend::CosSdk | Backend::CosRaw => object_key(&credentials.prefix, remote_dir, name),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Files to upload, in a stable order
fn plan(source: &Path, remote_dir: &str) -> std::io::Result<Vec<PlannedFile>> {
    if source.is_file() {
        return Ok(vec![PlannedFile {
            local: source.to_path_buf(),
            remote_dir: remote_dir.to_string(),
        }]);
    }

    let mut files = Vec::new();
    walk_dir(source, source, remote_dir, &mut files)?;
    Ok(files)
}

fn walk_dir(
    dir: &Path,
    base: &Path,
    remote_dir: &str,
    files: &mut Vec<PlannedFile>,
) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_file() {
            let relative_dir = path
                .parent()
                .and_then(|p| p.strip_prefix(base).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            files.push(PlannedFile {
                remote_dir: join_remote(remote_dir, &relative_dir),
                local: path,
            });
        } else if path.is_dir() {
            walk_dir(&path, base, remote_dir, files)?;
        }
    }
    Ok(())
}

fn join_remote(base: &str, relative: &str) -> String {
    match (base.trim_matches('/'), relative.trim_matches('/')) {
        ("", rel) => rel.to_string(),
        (base, "") => base.to_string(),
        (base, rel) => format!("{base}/{rel}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(source: &Path) -> UploadArgs {
        UploadArgs {
            source: source.to_path_buf(),
            path: String::new(),
            token: String::new(),
            endpoint: None,
            backend: None,
            part_size: None,
            concurrency: None,
            no_probe: false,
            dry_run: false,
            continue_on_error: false,
        }
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("", ""), "");
        assert_eq!(join_remote("/docs/", ""), "docs");
        assert_eq!(join_remote("", "a/b"), "a/b");
        assert_eq!(join_remote("docs", "a/b"), "docs/a/b");
    }

    #[test]
    fn test_plan_single_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"x").unwrap();

        let files = plan(&file, "/docs").unwrap();
        assert_eq!(
            files,
            vec![PlannedFile {
                local: file,
                remote_dir: "/docs".to_string(),
            }]
        );
    }

    #[test]
    fn test_plan_directory_keeps_layout() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("sub/c.txt"), b"c").unwrap();
        fs::write(dir.path().join("sub/deeper/d.txt"), b"d").unwrap();

        let files = plan(dir.path(), "docs").unwrap();
        let planned: Vec<(String, String)> = files
            .iter()
            .map(|f| (file_name(&f.local), f.remote_dir.clone()))
            .collect();

        assert_eq!(
            planned,
            vec![
                ("a.txt".to_string(), "docs".to_string()),
                ("b.txt".to_string(), "docs".to_string()),
                ("c.txt".to_string(), "docs/sub".to_string()),
                ("d.txt".to_string(), "docs/sub/deeper".to_string()),
            ]
        );
    }

    #[test]
    fn test_options_overrides() {
        let dir = TempDir::new().unwrap();
        let mut args = args(dir.path());
        args.endpoint = Some("http://127.0.0.1:9000".to_string());
        args.concurrency = Some(9);
        args.no_probe = true;

        let options = options_for(&args, &Config::default());
        assert_eq!(options.endpoint.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(options.multipart.concurrency, 9);
        assert!(!options.probe);
    }

    #[test]
    fn test_planned_key_per_backend() {
        let credentials = Credentials {
            session_token: "t".into(),
            access_key_id: "a".into(),
            secret_access_key: "s".into(),
            bucket: "b".into(),
            region: "r".into(),
            prefix: "pre".into(),
        };
        assert_eq!(
            planned_key(Backend::CosRaw, &credentials, "/docs/", "a.txt"),
            "pre/docs/a.txt"
        );
        assert_eq!(
            planned_key(Backend::S3, &credentials, "/docs/", "a.txt"),
            "docs/a.txt"
        );
    }
}
