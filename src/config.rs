// src/config.rs

//! Manages relay configuration: loading from TOML, defaults, and validation.

use crate::core::identity::BanScope;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Buffer and queue sizing for connections and the event loop.
#[derive(Deserialize, Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of the single queue feeding the event loop.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Chunks a client's outbox can hold before deliveries to it are dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Size of the fixed buffer each read fills. One read is one message.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// How long a client may take to send its token.
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
    /// How long a single write to a client may block its writer task.
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,
}

fn default_event_queue_capacity() -> usize {
    16
}
fn default_outbox_capacity() -> usize {
    64
}
fn default_read_buffer_size() -> usize {
    512
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            outbox_capacity: default_outbox_capacity(),
            read_buffer_size: default_read_buffer_size(),
            handshake_timeout: default_handshake_timeout(),
            write_timeout: default_write_timeout(),
        }
    }
}

/// Rate limiting and ban policy enforced by the event loop.
#[derive(Deserialize, Debug, Clone)]
pub struct PolicyConfig {
    /// Minimum spacing between two accepted messages from one client.
    #[serde(with = "humantime_serde", default = "default_message_rate")]
    pub message_rate: Duration,
    /// Strikes after which a client is banned.
    #[serde(default = "default_ban_limit")]
    pub ban_limit: u32,
    /// How long a ban refuses reconnection.
    #[serde(with = "humantime_serde", default = "default_ban_duration")]
    pub ban_duration: Duration,
    /// What a ban is keyed on. With `ip`, a ban also evicts every other member
    /// session from that IP; operator sessions already connected are spared.
    #[serde(default)]
    pub ban_scope: BanScope,
    /// How often the event loop drops expired ban entries.
    #[serde(with = "humantime_serde", default = "default_ban_purge_interval")]
    pub ban_purge_interval: Duration,
}

fn default_message_rate() -> Duration {
    Duration::from_secs(1)
}
fn default_ban_limit() -> u32 {
    10
}
fn default_ban_duration() -> Duration {
    Duration::from_secs(10)
}
fn default_ban_purge_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            message_rate: default_message_rate(),
            ban_limit: default_ban_limit(),
            ban_duration: default_ban_duration(),
            ban_scope: BanScope::default(),
            ban_purge_interval: default_ban_purge_interval(),
        }
    }
}

/// Configuration for TLS encryption.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

fn default_cert_path() -> String {
    "tokenrelay.crt".to_string()
}
fn default_key_path() -> String {
    "tokenrelay.key".to_string()
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9969
}

/// The complete, validated relay configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum number of simultaneously open connections.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Fixed operator token. A random one is generated at startup when absent.
    #[serde(default)]
    pub operator_token: Option<String>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    6969
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            operator_token: None,
            relay: RelayConfig::default(),
            policy: PolicyConfig::default(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.relay.event_queue_capacity == 0 {
            return Err(anyhow!("relay.event_queue_capacity cannot be 0"));
        }
        if self.relay.outbox_capacity == 0 {
            return Err(anyhow!("relay.outbox_capacity cannot be 0"));
        }
        if self.relay.read_buffer_size < 2 {
            return Err(anyhow!("relay.read_buffer_size must be at least 2 bytes"));
        }
        if self.relay.handshake_timeout.is_zero() {
            return Err(anyhow!("relay.handshake_timeout cannot be 0"));
        }
        if self.relay.write_timeout.is_zero() {
            return Err(anyhow!("relay.write_timeout cannot be 0"));
        }
        if self.policy.ban_limit == 0 {
            return Err(anyhow!("policy.ban_limit cannot be 0"));
        }
        if self.policy.ban_purge_interval.is_zero() {
            return Err(anyhow!("policy.ban_purge_interval cannot be 0"));
        }
        if self.policy.message_rate.is_zero() {
            warn!("policy.message_rate is 0; rate limiting is disabled.");
        }

        if let Some(token) = &self.operator_token
            && token.trim().is_empty()
        {
            return Err(anyhow!("operator_token cannot be empty when set"));
        }

        if self.tls.enabled {
            if self.tls.cert_path.trim().is_empty() {
                return Err(anyhow!("tls.cert_path cannot be empty when TLS is enabled"));
            }
            if self.tls.key_path.trim().is_empty() {
                return Err(anyhow!("tls.key_path cannot be empty when TLS is enabled"));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the relay port"
                ));
            }
        }
        Ok(())
    }
}
