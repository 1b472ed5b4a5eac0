//! config command - Show or change the configuration file

use clap::Subcommand;
use peg_core::{Config, ConfigManager};
use peg_cos::Backend;
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Set the default uploader backend
    SetBackend {
        /// cos-sdk, cos-raw or s3
        backend: String,
    },

    /// Set or clear the default endpoint
    SetEndpoint {
        /// Endpoint URL; omit to clear
        endpoint: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct ShowOutput<'a> {
    path: String,
    config: &'a Config,
}

/// Execute a config subcommand
pub fn execute(
    cmd: ConfigCommands,
    manager: &ConfigManager,
    config: Config,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    match cmd {
        ConfigCommands::Show => show(manager, &config, &formatter),
        ConfigCommands::SetBackend { backend } => match backend.parse::<Backend>() {
            Ok(backend) => {
                let mut config = config;
                config.defaults.backend = backend.to_string();
                save(manager, &config, &formatter, &format!("Default backend set to {backend}"))
            }
            Err(e) => {
                formatter.error(&format!("{e} (expected one of: cos-sdk, cos-raw, s3)"));
                ExitCode::UsageError
            }
        },
        ConfigCommands::SetEndpoint { endpoint } => {
            let mut config = config;
            let message = match &endpoint {
                Some(url) => format!("Default endpoint set to {url}"),
                None => "Default endpoint cleared".to_string(),
            };
            config.upload.endpoint = endpoint;
            save(manager, &config, &formatter, &message)
        }
    }
}

fn show(manager: &ConfigManager, config: &Config, formatter: &Formatter) -> ExitCode {
    let path = manager.config_path().display().to_string();

    if formatter.is_json() {
        formatter.json(&ShowOutput { path, config });
        return ExitCode::Success;
    }

    match toml::to_string_pretty(config) {
        Ok(rendered) => {
            formatter.println(&format!("# {path}"));
            formatter.println(rendered.trim_end());
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to render configuration: {e}"));
            ExitCode::GeneralError
        }
    }
}

fn save(manager: &ConfigManager, config: &Config, formatter: &Formatter, message: &str) -> ExitCode {
    match manager.save(config) {
        Ok(()) => {
            formatter.success(message);
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to save configuration: {e}"));
            ExitCode::from_error(&e)
        }
    }
}
