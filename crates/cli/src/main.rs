//! signalk-mqtt-push - forward Signal K paths to an MQTT broker

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod cmd;

/// Push selected Signal K self paths to an MQTT broker
#[derive(Parser)]
#[command(name = "signalk-mqtt-push")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward deltas read from stdin until it closes or the process is interrupted
    Run {
        /// Configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
        /// Override the configured data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Keep forwarding after stdin reaches end of file
        #[arg(long)]
        keep_running: bool,
    },
    /// Inspect configuration
    Config {
        /// Print an example configuration file
        #[arg(long, conflicts_with = "check")]
        example: bool,
        /// Validate a configuration file
        #[arg(long)]
        check: Option<PathBuf>,
    },
    /// Show messages waiting for broker acknowledgement
    Outbox {
        /// Data directory holding the outbox
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir.as_deref());

    match cli.command {
        Commands::Run { config, data_dir, keep_running } => {
            cmd::run::run(&config, data_dir, keep_running).await
        }
        Commands::Config { example, check } => match check {
            Some(path) => cmd::config::run_check(&path).await,
            None if example => cmd::config::run_example().await,
            None => anyhow::bail!("Use --example or --check <file>"),
        },
        Commands::Outbox { data_dir } => cmd::outbox::run(&data_dir).await,
    }
}

/// Install the fmt subscriber, honouring RUST_LOG (default `info`)
fn init_logging(log_dir: Option<&Path>) -> WorkerGuard {
    let (writer, guard) = match log_dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            "signalk-mqtt-push.log",
        )),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_dir.is_none())
        .init();

    guard
}
