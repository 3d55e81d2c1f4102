//! K2L CLI - copy a Kafka partition into a lake with remapped offsets.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use k2l_core::config::{LogFormat, LogLevel};
use k2l_core::Config;
use std::path::{Path, PathBuf};
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
    /// Kafka-related error (connection, watermarks, consume)
    KafkaError = 2,
    /// Lake error (journal, segments, offset mismatch)
    LakeError = 3,
    /// A record without usable kafka metadata
    RemapError = 4,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<k2l_core::Error>() {
            return match core {
                k2l_core::Error::Config(_) => ExitCode::ConfigError,
                k2l_core::Error::Kafka(_) => ExitCode::KafkaError,
                k2l_core::Error::Lake(_) => ExitCode::LakeError,
                k2l_core::Error::Remap(_) => ExitCode::RemapError,
                k2l_core::Error::Shutdown => ExitCode::SignalInterrupt,
                k2l_core::Error::Io(_)
                | k2l_core::Error::Serialization(_)
                | k2l_core::Error::Metrics(_) => ExitCode::RuntimeError,
            };
        }

        if error.downcast_ref::<toml::de::Error>().is_some() {
            return ExitCode::ConfigError;
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") {
            ExitCode::ConfigError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Parser)]
#[command(name = "k2l")]
#[command(about = "Copy a Kafka partition into a lake with contiguous offsets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Flags that override the configuration file.
#[derive(Args, Debug, Default, Clone)]
struct Overrides {
    /// Override Kafka bootstrap servers (comma separated)
    #[arg(long)]
    bootstrap_servers: Option<String>,

    /// Override Kafka topic
    #[arg(long)]
    topic: Option<String>,

    /// Override Kafka partition
    #[arg(long)]
    partition: Option<i32>,

    /// Override lake directory
    #[arg(long)]
    lake_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy everything up to the current high-water mark into the lake
    Sync {
        #[command(flatten)]
        overrides: Overrides,

        /// Keep syncing on an interval and serve health and metrics
        #[arg(long)]
        watch: bool,

        /// Seconds between syncs in watch mode (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show the local lake's commits and offsets
    Status {
        /// Lake directory (overrides config)
        #[arg(long)]
        lake_path: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the health endpoint of a running `k2l sync --watch`
    Health {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },

    /// Validate configuration file
    Validate {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log settings come from the config file when one can be read
    let logging = config_path(&cli.config)
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| (config.monitoring.log_level, config.monitoring.log_format))
        .unwrap_or((LogLevel::Info, LogFormat::Json));

    init_logging(cli.verbose, logging.0, logging.1);

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

fn init_logging(verbose: u8, level: LogLevel, format: LogFormat) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new(level.as_str()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match format {
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
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync {
            overrides,
            watch,
            interval,
        } => {
            let mut config = load_config(&cli.config, &overrides)?;
            if let Some(seconds) = interval {
                config.sync.interval_seconds = seconds;
            }
            config.validate()?;
            commands::sync::run(config, watch).await?;
        }

        Commands::Status { lake_path, json } => {
            let path = match lake_path {
                Some(path) => path,
                None => match config_path(&cli.config) {
                    Some(path) => Config::from_file(&path)?.lake.path,
                    None => k2l_core::config::LakeConfig::default().path,
                },
            };
            commands::status::run(&path, json)?;
        }

        Commands::Health { url, metrics_url } => {
            commands::health::run(&url, &metrics_url).await?;
        }

        Commands::Validate { overrides } => {
            let config = load_config(&cli.config, &overrides)?;
            commands::validate::run(&config)?;
        }
    }

    Ok(())
}

/// Explicit `--config`, else `./config.toml` if it exists.
fn config_path(explicit: &Option<PathBuf>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.clone()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}

/// Load the config file and apply flag overrides.
///
/// Without a config file, `--topic` and `--bootstrap-servers` are enough to
/// build a config from defaults.
fn load_config(path: &Option<PathBuf>, overrides: &Overrides) -> Result<Config> {
    let mut config = match config_path(path) {
        Some(path) => read_config(&path)?,
        None => {
            let (Some(servers), Some(topic)) = (&overrides.bootstrap_servers, &overrides.topic)
            else {
                return Err(k2l_core::Error::Config(format!(
                    "no config file found ({} or --config) and --topic/--bootstrap-servers not both given",
                    DEFAULT_CONFIG_FILE
                ))
                .into());
            };
            Config::for_topic(split_servers(servers), topic.clone())
        }
    };

    apply_overrides(&mut config, overrides);
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    if let Some(ref servers) = overrides.bootstrap_servers {
        config.kafka.bootstrap_servers = split_servers(servers);
    }
    if let Some(ref topic) = overrides.topic {
        config.kafka.topic = topic.clone();
    }
    if let Some(partition) = overrides.partition {
        config.kafka.partition = partition;
    }
    if let Some(ref path) = overrides.lake_path {
        config.lake.path = path.clone();
    }
}

fn split_servers(servers: &str) -> Vec<String> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
