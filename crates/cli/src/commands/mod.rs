//! CLI command definitions and execution

use clap::{Parser, Subcommand};
use peg_core::{Config, ConfigManager};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

pub mod config;
pub mod inspect;
pub mod upload;

/// peg - upload files to object storage with a temporary credential bundle
#[derive(Parser, Debug)]
#[command(name = "peg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bars
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a file, or a directory recursively
    Upload(upload::UploadArgs),

    /// Decode a credential bundle and show where uploads would land
    Inspect(inspect::InspectArgs),

    /// Show or change the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };

    let (manager, config) = match load_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            Formatter::new(output_config).error(&format!("Failed to load configuration: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let output_config = output_config.with_defaults(&config.defaults);

    match cli.command {
        Commands::Upload(args) => upload::execute(args, &config, output_config).await,
        Commands::Inspect(args) => inspect::execute(args, output_config),
        Commands::Config(cmd) => config::execute(cmd, &manager, config, output_config),
    }
}

fn load_config() -> peg_core::Result<(ConfigManager, Config)> {
    let manager = ConfigManager::new()?;
    let config = manager.load()?;
    Ok((manager, config))
}
