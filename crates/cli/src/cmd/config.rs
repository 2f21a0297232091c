//! Configuration command
//!
//! Prints an example file or validates an existing one.

use anyhow::Result;
use owo_colors::OwoColorize;
use push_lib::config::{example_config, Config};
use push_lib::link::MqttConnector;
use std::path::Path;

/// Validate a configuration file and summarise it
pub async fn run_check(path: &Path) -> Result<()> {
    let config = Config::load(path)?;

    if let Err(e) = config.validate() {
        println!("{} {}", "✗".red(), e);
        anyhow::bail!("Configuration in {} is invalid", path.display());
    }

    let url = config.broker_url()?;
    // Catches TLS setup problems (e.g. unreadable platform roots) up front
    let connector = MqttConnector::new(&config, "config-check")?;

    println!("{} {}", "✓".green(), path.display());
    println!(
        "  {} = {}:{} {}",
        "broker".cyan(),
        url.host,
        url.port,
        format!("({:?})", connector.tls_mode()).dimmed()
    );
    println!(
        "  {} = {}",
        "username".cyan(),
        config.username().unwrap_or("(none)")
    );
    println!("  {} = {}", "data_dir".cyan(), config.data_dir.display());

    println!("\n{}", "[paths]".yellow());
    for path in config.path_configs() {
        println!(
            "  {} {}",
            path.path.cyan(),
            format!("every {:?}, trailing {:?}", path.interval, path.trailing).dimmed()
        );
    }

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    print!("{}", example_config());
    Ok(())
}
