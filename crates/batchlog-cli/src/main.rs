//! batchlog CLI - ship log lines to object storage in batches.

use anyhow::Result;
use batchlog_core::config::LogFormat;
use batchlog_core::{Config, Level};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Storage error (S3, filesystem, provisioning, upload)
    StorageError = 4,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Convert an error to an exit code.
    ///
    /// Core errors are matched by variant; anything else falls back to the
    /// error message.
    fn from_ship_outcome(outcome: commands::ship::ShipOutcome) -> Self {
        match outcome {
            commands::ship::ShipOutcome::Completed => ExitCode::Success,
            commands::ship::ShipOutcome::Interrupted => ExitCode::SignalInterrupt,
            commands::ship::ShipOutcome::InputFailed => ExitCode::RuntimeError,
        }
    }

    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<batchlog_core::Error>() {
            return match core {
                batchlog_core::Error::InvalidConfiguration(_) => ExitCode::ConfigError,
                batchlog_core::Error::Sink(_) => ExitCode::StorageError,
                _ => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();

        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("storage")
            || error_str.contains("s3")
            || error_str.contains("object_store")
        {
            ExitCode::StorageError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "batchlog")]
#[command(about = "Ship log lines to object storage in batches", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Read log lines and ship them in batches
    Ship {
        /// Read from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,

        /// Source recorded on every event
        #[arg(long, default_value = "stdin")]
        source: String,

        /// Level recorded on every event
        #[arg(long, default_value = "info")]
        level: Level,

        /// Lines are serialized events; unparsable lines are shipped as plain messages
        #[arg(long)]
        json: bool,
    },

    /// Publish one probe event to check the storage sink
    FlushTest,

    /// Show status and health
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint base URL (defaults to the health URL on port 9090)
        #[arg(long)]
        metrics_url: Option<String>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Try to load config for log settings (optional - falls back to JSON/info)
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| Config::load(path).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format.clone())
        .unwrap_or(LogFormat::Json);
    let base_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_filter())
        .unwrap_or("info");

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(base_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Diagnostics go to stderr; stdout is for command output.
    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Ship {
            input,
            source,
            level,
            json,
        } => {
            let config = load_config(&cli.config)?;
            let options = commands::ship::ShipOptions {
                input,
                source,
                level,
                json,
            };
            let outcome = commands::ship::run(config, options).await?;
            return Ok(ExitCode::from_ship_outcome(outcome));
        }

        Commands::FlushTest => {
            let config = load_config(&cli.config)?;
            commands::flush_test::run(config).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, metrics_url.as_deref()).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(ExitCode::Success)
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));
    Ok(Config::load(&path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlog_core::error::SinkError;

    #[test]
    fn test_exit_code_from_core_error() {
        let err = anyhow::Error::new(batchlog_core::Error::InvalidConfiguration("bad".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);

        let err = anyhow::Error::new(batchlog_core::Error::from(SinkError::Transfer {
            key: "k".into(),
            message: "reset".into(),
        }));
        assert_eq!(ExitCode::from_error(&err), ExitCode::StorageError);

        let err = anyhow::Error::new(batchlog_core::Error::CacheClosed);
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_exit_code_from_ship_outcome() {
        use commands::ship::ShipOutcome;
        assert_eq!(ExitCode::from_ship_outcome(ShipOutcome::Completed), ExitCode::Success);
        assert_eq!(
            ExitCode::from_ship_outcome(ShipOutcome::Interrupted),
            ExitCode::SignalInterrupt
        );
        assert_eq!(
            ExitCode::from_ship_outcome(ShipOutcome::InputFailed),
            ExitCode::RuntimeError
        );
    }

    #[test]
    fn test_exit_code_from_message() {
        let err = anyhow::anyhow!("failed to parse line 3");
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);

        let err = anyhow::anyhow!("S3 endpoint unreachable");
        assert_eq!(ExitCode::from_error(&err), ExitCode::StorageError);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_cli_parses_ship() {
        let cli = Cli::try_parse_from([
            "batchlog", "-c", "cfg.toml", "ship", "--source", "nginx", "--level", "warn", "--json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        match cli.command {
            Commands::Ship {
                source,
                level,
                json,
                input,
            } => {
                assert_eq!(source, "nginx");
                assert_eq!(level, Level::Warn);
                assert!(json);
                assert!(input.is_none());
            }
            _ => panic!("expected ship"),
        }
    }
}
