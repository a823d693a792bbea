//! rowcast CLI - publish query results as CloudEvents.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rowcast_core::config::{EventEncoding, LogFormat, MonitoringConfig};
use rowcast_core::{Config, SinkError};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod server;

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution, including runs with undelivered events
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Data source error (connection, query execution)
    SourceError = 2,
    /// A row could not be encoded as JSON
    SerializationError = 3,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Map an error to an exit code by its rowcast error kind.
    fn from_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<rowcast_core::Error>() {
            Some(rowcast_core::Error::Config(_))
            | Some(rowcast_core::Error::Sink(SinkError::Client(_))) => ExitCode::ConfigError,
            Some(rowcast_core::Error::Source(_)) => ExitCode::SourceError,
            Some(rowcast_core::Error::Serialization(_)) => ExitCode::SerializationError,
            _ => ExitCode::RuntimeError,
        }
    }
}

#[derive(Parser)]
#[command(name = "rowcast")]
#[command(about = "Publish query results to an HTTP sink as CloudEvents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ./rowcast.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the query once and publish every row
    Publish(Overrides),

    /// Validate the effective configuration
    Validate(Overrides),

    /// Show health and metrics of a running publisher
    Status {
        /// Monitoring server URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,
    },
}

/// Settings that override the configuration file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// PostgreSQL connection string
    #[arg(long, env = "ROWCAST_SOURCE_URL", hide_env_values = true)]
    connection: Option<String>,

    /// Query text
    #[arg(long, env = "ROWCAST_QUERY")]
    query: Option<String>,

    /// Positional query parameter, repeat for $1, $2, ...
    #[arg(long = "param")]
    params: Vec<String>,

    /// Sink host including scheme
    #[arg(long, env = "ROWCAST_SINK_HOST")]
    sink_host: Option<String>,

    /// Sink port
    #[arg(long, env = "ROWCAST_SINK_PORT")]
    sink_port: Option<u16>,

    /// Sink request path
    #[arg(long)]
    sink_path: Option<String>,

    /// CloudEvents HTTP encoding
    #[arg(long, value_enum)]
    encoding: Option<EncodingArg>,

    /// CloudEvents type attribute
    #[arg(long, env = "ROWCAST_EVENT_TYPE")]
    event_type: Option<String>,

    /// CloudEvents source attribute
    #[arg(long, env = "ROWCAST_EVENT_SOURCE")]
    event_source: Option<String>,

    /// Port for the health and metrics server
    #[arg(long)]
    http_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncodingArg {
    Structured,
    Binary,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(connection) = self.connection {
            config.source.connection_string = connection;
        }
        if let Some(query) = self.query {
            config.source.query = query;
        }
        if !self.params.is_empty() {
            config.source.params = self.params;
        }
        if let Some(host) = self.sink_host {
            config.sink.host = host;
        }
        if let Some(port) = self.sink_port {
            config.sink.port = Some(port);
        }
        if let Some(path) = self.sink_path {
            config.sink.path = path;
        }
        if let Some(encoding) = self.encoding {
            config.sink.encoding = match encoding {
                EncodingArg::Structured => EventEncoding::Structured,
                EncodingArg::Binary => EventEncoding::Binary,
            };
        }
        if let Some(event_type) = self.event_type {
            config.event.event_type = event_type;
        }
        if let Some(event_source) = self.event_source {
            config.event.event_source = event_source;
        }
        if let Some(port) = self.http_port {
            config.monitoring.http_port = Some(port);
        }
    }
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // A broken config file is reported after logging is up.
    let loaded = Config::load(cli.config.as_deref());
    let monitoring = loaded
        .as_ref()
        .map(|config| config.monitoring.clone())
        .unwrap_or_default();
    init_logging(&monitoring, cli.verbose);

    match execute_command(cli.command, loaded).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

fn init_logging(monitoring: &MonitoringConfig, verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new(monitoring.log_level.as_directive()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }
}

/// Execute the CLI command.
async fn execute_command(
    command: Commands,
    loaded: rowcast_core::Result<Config>,
) -> Result<ExitCode> {
    match command {
        Commands::Publish(overrides) => {
            let mut config = loaded?;
            overrides.apply(&mut config);
            let summary = commands::publish::run(config).await?;
            if summary.interrupted {
                return Ok(ExitCode::SignalInterrupt);
            }
        }

        Commands::Validate(overrides) => {
            let mut config = loaded?;
            overrides.apply(&mut config);
            config.validate()?;
            println!("Configuration is valid");
            println!("  endpoint: {}", config.sink.endpoint());
            println!("  encoding: {:?}", config.sink.encoding);
            println!(
                "  retry:    {} attempts, {}ms initial delay, x{}",
                config.retry.max_attempts, config.retry.initial_delay_ms, config.retry.multiplier
            );
        }

        Commands::Status { url } => {
            commands::status::run(&url).await?;
        }
    }

    Ok(ExitCode::Success)
}
