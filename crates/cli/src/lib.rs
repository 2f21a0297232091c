//! Push selected Signal K paths to an MQTT broker
//!
//! Wiring of the forwarding pipeline: configuration, publish sink, broker
//! link and the connection supervisor.

pub mod backoff;
pub mod config;
pub mod identity;
pub mod ingest;
pub mod link;
pub mod sink;
pub mod supervisor;

pub use config::{Config, ConfigError};
pub use link::{Connector, Link, LinkEvent, MqttConnector};
pub use sink::PublishSink;
pub use supervisor::{ConnectionState, Supervisor, SupervisorHandle};

use anyhow::{Context, Result};
use journal::Outbox;
use push_core::UpdateSource;
use std::sync::Arc;

/// Start forwarding `source` to the broker described by `config`
///
/// Configuration errors are returned before anything is spawned. Must be
/// called from within a tokio runtime.
pub fn start(config: &Config, source: Arc<dyn UpdateSource>) -> Result<SupervisorHandle> {
    let self_id = resolve_self_id(config)?;
    let outbox = Arc::new(Outbox::open(&config.data_dir)?);
    let connector = MqttConnector::new(config, &self_id)?;

    let supervisor = Supervisor::new(
        connector,
        source,
        config.path_configs(),
        &self_id,
        outbox,
        config.reconnect.backoff(),
    );
    Ok(supervisor.start())
}

/// Validate `config` and resolve the vessel id it will publish under
pub fn resolve_self_id(config: &Config) -> Result<String> {
    config.validate().context("Invalid configuration")?;
    identity::resolve_self_id(config.self_id.as_deref(), &config.data_dir)
}
