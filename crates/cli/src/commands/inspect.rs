//! inspect command - Decode a credential bundle
//!
//! Shows the bucket, region and key prefix carried in the bundle's info
//! segment. The session token and secret key are never printed.

use std::fmt;

use clap::Args;
use peg_core::Credentials;
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Decode a credential bundle
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Credential bundle `token:accessKeyId:secretAccessKey:info`
    #[arg(long, env = "PEG_UPLOAD_TOKEN", hide_env_values = true)]
    pub token: String,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    bucket: String,
    region: String,
    prefix: String,
    access_key_id: String,
}

impl From<&Credentials> for InspectOutput {
    fn from(credentials: &Credentials) -> Self {
        Self {
            bucket: credentials.bucket.clone(),
            region: credentials.region.clone(),
            prefix: credentials.prefix.clone(),
            access_key_id: credentials.access_key_id.clone(),
        }
    }
}

impl fmt::Display for InspectOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bucket:        {}", self.bucket)?;
        writeln!(f, "Region:        {}", self.region)?;
        writeln!(f, "Prefix:        {}/", self.prefix)?;
        write!(f, "Access key id: {}", self.access_key_id)
    }
}

/// Execute the inspect command
pub fn execute(args: InspectArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    match Credentials::from_bundle(&args.token) {
        Ok(credentials) => {
            tracing::debug!(?credentials, "decoded upload token");
            formatter.output(&InspectOutput::from(&credentials));
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Invalid upload token: {e}"));
            ExitCode::from_error(&e)
        }
    }
}
