//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for the agent using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Hostagent - export job scheduler and worker supervisor
#[derive(Parser, Debug)]
#[command(name = "hostagent")]
#[command(version, about, long_about = None)]
#[command(author = "Hostagent Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "hostagent.toml", env = "HOSTAGENT_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "HOSTAGENT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent: accept control messages on stdin, emit events on stdout
    Serve(commands::serve::ServeArgs),

    /// Run one export job as a worker process
    #[command(hide = true)]
    Export(commands::export::ExportArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Show cursors, queued jobs and backup state
    Status(commands::status::StatusArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::parse_from(["hostagent", "serve"]);
        assert_eq!(cli.config, "hostagent.toml");
        assert!(matches!(cli.command, Commands::Serve(_)));
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::parse_from(["hostagent", "--config", "custom.toml", "serve"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn test_cli_parse_with_log_level() {
        let cli = Cli::parse_from(["hostagent", "--log-level", "debug", "status"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_parse_worker_export() {
        let cli = Cli::parse_from([
            "hostagent",
            "export",
            "--agent-config-file",
            "/tmp/a.json",
            "--integrations-file",
            "/tmp/i.json",
            "--log-format",
            "json",
            "--output-file",
            "/tmp/o.json",
            "--pinpoint-root=/var/lib/hostagent",
        ]);
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.log_format, "json");
                assert_eq!(
                    args.state_root.as_deref(),
                    Some(std::path::Path::new("/var/lib/hostagent"))
                );
                assert!(args.output_file.is_some());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_validate_config() {
        let cli = Cli::parse_from(["hostagent", "validate-config"]);
        assert!(matches!(cli.command, Commands::ValidateConfig(_)));
    }

    #[test]
    fn test_cli_parse_init() {
        let cli = Cli::parse_from(["hostagent", "init"]);
        assert!(matches!(cli.command, Commands::Init(_)));
    }
}
