//! Configuration loading and validation
//!
//! Files ending in `.json` are read as the host plugin's JSON options
//! (camelCase keys accepted), anything else as TOML.

use crate::backoff::Backoff;
use anyhow::{Context, Result};
use push_core::{PathConfig, TrailingPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Path forwarded when no `paths` are configured
pub const DEFAULT_PATH: &str = "navigation.position";
/// Interval for [`DEFAULT_PATH`], in seconds
pub const DEFAULT_INTERVAL_SECS: f64 = 60.0;
/// Longest accepted debounce interval (one week), in seconds
pub const MAX_INTERVAL_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Configuration problems that prevent start-up
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("remote_host is required (e.g. mqtt://broker.local or mqtts://broker.local:8883)")]
    MissingRemoteHost,
    #[error("invalid broker URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("path entry {index} is empty")]
    EmptyPath { index: usize },
    #[error("path '{path}' contains MQTT wildcard characters")]
    WildcardPath { path: String },
    #[error("interval for '{path}' must be between 0 and 604800 seconds (one week)")]
    InvalidInterval { path: String },
    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

/// Broker endpoint parsed from `remote_host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerUrl {
    /// Parse `mqtt://`, `tcp://`, `mqtts://` or `ssl://` URLs
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;

        let (tls, default_port) = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => (false, 1883),
            "mqtts" | "ssl" => (true, 8883),
            _ => return Err(invalid("scheme must be mqtt, mqtts, tcp or ssl")),
        };

        let authority = rest.trim_end_matches('/');
        if authority.contains('/') || authority.contains('@') {
            return Err(invalid("only host[:port] is supported"));
        }

        let parse_port = |port: &str| port.parse::<u16>().map_err(|_| invalid("port is not a number"));

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            // IPv6 literal, e.g. [::1] or [::1]:1884
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            match after.strip_prefix(':') {
                Some(port) => (host, parse_port(port)?),
                None if after.is_empty() => (host, default_port),
                None => return Err(invalid("unexpected characters after IPv6 address")),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (authority, default_port),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// One entry of the `paths` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub path: String,
    /// Minimum seconds between updates; absent means no limit
    #[serde(default)]
    pub interval: f64,
    #[serde(default)]
    pub trailing: TrailingPolicy,
}

/// Reconnect backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    #[serde(alias = "firstMs")]
    pub first_ms: u64,
    #[serde(alias = "maxMs")]
    pub max_ms: u64,
    pub factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let backoff = Backoff::default();
        Self {
            first_ms: backoff.first.as_millis() as u64,
            max_ms: backoff.max.as_millis() as u64,
            factor: backoff.factor,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            first: Duration::from_millis(self.first_ms),
            max: Duration::from_millis(self.max_ms),
            factor: self.factor,
        }
    }
}

/// Forwarder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker URL (required)
    #[serde(alias = "remoteHost")]
    pub remote_host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Verify the broker's TLS certificate; off by default so self-signed brokers work
    #[serde(alias = "rejectUnauthorized")]
    pub reject_unauthorized: bool,
    pub paths: Vec<PathEntry>,
    /// Vessel identifier; generated and persisted in `data_dir` when unset
    #[serde(alias = "selfId")]
    pub self_id: Option<String>,
    /// Directory for the outbox and the persisted self id
    #[serde(alias = "dataDir")]
    pub data_dir: PathBuf,
    #[serde(alias = "keepAliveSecs")]
    pub keep_alive_secs: u64,
    /// Broker-side in-flight window and client request queue size
    #[serde(alias = "inflightCapacity")]
    pub inflight_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_host: None,
            username: None,
            password: None,
            reject_unauthorized: false,
            paths: vec![PathEntry {
                path: DEFAULT_PATH.to_string(),
                interval: DEFAULT_INTERVAL_SECS,
                trailing: TrailingPolicy::default(),
            }],
            self_id: None,
            data_dir: PathBuf::from("data"),
            keep_alive_secs: 60,
            inflight_capacity: 100,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML or JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))
        } else {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))
        }
    }

    /// Check everything that would make start-up fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_url()?;

        for (index, entry) in self.paths.iter().enumerate() {
            if entry.path.trim().is_empty() {
                return Err(ConfigError::EmptyPath { index });
            }
            if entry.path.contains(['+', '#']) {
                return Err(ConfigError::WildcardPath {
                    path: entry.path.clone(),
                });
            }
            if !(0.0..=MAX_INTERVAL_SECS).contains(&entry.interval) {
                return Err(ConfigError::InvalidInterval {
                    path: entry.path.clone(),
                });
            }
        }

        if !(5..=65_535).contains(&self.keep_alive_secs) {
            return Err(ConfigError::OutOfRange {
                field: "keep_alive_secs",
                reason: "must be between 5 and 65535".to_string(),
            });
        }

        if !(1..=u16::MAX as usize).contains(&self.inflight_capacity) {
            return Err(ConfigError::OutOfRange {
                field: "inflight_capacity",
                reason: "must be between 1 and 65535".to_string(),
            });
        }

        let r = &self.reconnect;
        if r.first_ms == 0 || r.max_ms < r.first_ms || !r.factor.is_finite() || r.factor < 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "reconnect",
                reason: "need 0 < first_ms <= max_ms and factor >= 1".to_string(),
            });
        }

        Ok(())
    }

    /// Parsed broker endpoint
    pub fn broker_url(&self) -> Result<BrokerUrl, ConfigError> {
        match self.remote_host.as_deref().map(str::trim) {
            None | Some("") => Err(ConfigError::MissingRemoteHost),
            Some(url) => BrokerUrl::parse(url),
        }
    }

    /// Username, ignoring the empty string the host UI stores for "unset"
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    /// Debouncer settings, one per configured path
    pub fn path_configs(&self) -> Vec<PathConfig> {
        self.paths
            .iter()
            .map(|entry| {
                // Unvalidated out-of-range values are clamped; NaN disables debouncing
                let secs = entry.interval.clamp(0.0, MAX_INTERVAL_SECS);
                let interval = Duration::try_from_secs_f64(secs).unwrap_or_default();
                PathConfig::new(entry.path.trim(), interval).with_trailing(entry.trailing)
            })
            .collect()
    }
}

/// Example configuration file
pub fn example_config() -> &'static str {
    r#"# signalk-mqtt-push configuration

# MQTT broker URL: mqtt:// (plain) or mqtts:// (TLS)
remote_host = "mqtts://broker.example.com:8883"
username = "boat"
password = "secret"

# Verify the broker certificate (false accepts self-signed certificates)
reject_unauthorized = false

# Leave unset to generate one and store it in data_dir/self_id
# self_id = "urn:mrn:signalk:uuid:c0d79334-4e25-4245-8892-54e8ccc8021d"
data_dir = "data"

keep_alive_secs = 60
inflight_capacity = 100

[reconnect]
first_ms = 1000
max_ms = 60000
factor = 2.0

# interval: minimum seconds between two updates of the path (0 = every update)
# trailing: "flush" sends the newest value at the end of each window,
#           "drop" only sends the first value of each window
[[paths]]
path = "navigation.position"
interval = 60

[[paths]]
path = "navigation.speedOverGround"
interval = 10
trailing = "drop"
"#
}
