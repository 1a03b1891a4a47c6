// Hostagent - Export job scheduler and worker supervisor
// Copyright (c) 2025 Hostagent Contributors
// Licensed under the MIT License

use clap::Parser;
use hostagent::cli::commands::{EXIT_CONFIG, EXIT_FATAL};
use hostagent::cli::{Cli, Commands};
use hostagent::config::{load_config, LoggingConfig};
use hostagent::logging::{init_logging, init_worker_logging, LogFormat, LoggingGuard};
use std::process;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(EXIT_CONFIG);
        }
    };

    if !matches!(cli.command, Commands::Export(_)) {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "Hostagent");
    }

    // Create shutdown signal channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
            let _ = shutdown_tx.send(true);
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            } else {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    let exit_code = match execute_command(&cli, shutdown_rx).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            // Worker crash output is read from stderr by the parent.
            eprintln!("Error: {e:#}");
            EXIT_FATAL
        }
    };

    drop(_guard);
    process::exit(exit_code);
}

/// Worker processes log JSON to stdout; everything else logs to stderr
fn setup_logging(cli: &Cli) -> anyhow::Result<LoggingGuard> {
    let level = cli.log_level.as_deref();

    if let Commands::Export(args) = &cli.command {
        let format: LogFormat = args.log_format.parse().map_err(anyhow::Error::msg)?;
        return Ok(init_worker_logging(level.unwrap_or("info"), format)?);
    }

    if let Commands::Serve(_) = &cli.command {
        if let Ok(config) = load_config(&cli.config) {
            let format: LogFormat = config
                .application
                .log_format
                .parse()
                .map_err(anyhow::Error::msg)?;
            let level = level.unwrap_or(&config.application.log_level);
            return Ok(init_logging(level, format, &config.logging)?);
        }
    }

    Ok(init_logging(
        level.unwrap_or("info"),
        LogFormat::Text,
        &LoggingConfig::default(),
    )?)
}

/// Execute the CLI command
async fn execute_command(cli: &Cli, shutdown_signal: watch::Receiver<bool>) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Serve(args) => args.execute(&cli.config, shutdown_signal).await,
        Commands::Export(args) => args.execute(shutdown_signal).await,
        Commands::ValidateConfig(args) => args.execute(&cli.config).await,
        Commands::Status(args) => args.execute(&cli.config).await,
        Commands::Init(args) => args.execute().await,
    }
}
