//! Client configuration at `~/.shellport/config.toml`.
//!
//! Provides the default endpoint and connection options.
//! CLI flags always override config file values.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shellport_core::{ConnectOptions, DEFAULT_ENDPOINT, ENDPOINT_ENV};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default endpoint settings.
    #[serde(default)]
    pub default: DefaultConfig,

    /// Connection options.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Default endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Session-transport service URL (empty = built-in default).
    #[serde(default)]
    pub endpoint: String,
}

/// Connection options as written in the config file. Durations are in
/// milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub with_credentials: bool,
    pub cookie: Option<String>,
    pub reconnection_attempts: u32,
    pub connect_timeout_ms: u64,
    pub reconnection_delay_ms: u64,
    pub reconnection_delay_max_ms: u64,
    pub randomization_factor: f64,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let opts = ConnectOptions::default();
        Self {
            with_credentials: opts.with_credentials,
            cookie: opts.cookie,
            reconnection_attempts: opts.reconnection_attempts,
            connect_timeout_ms: millis(opts.connect_timeout),
            reconnection_delay_ms: millis(opts.reconnection_delay),
            reconnection_delay_max_ms: millis(opts.reconnection_delay_max),
            randomization_factor: opts.randomization_factor,
            ping_interval_ms: millis(opts.ping_interval),
            ping_timeout_ms: millis(opts.ping_timeout),
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl ConnectionConfig {
    pub fn to_options(&self) -> ConnectOptions {
        ConnectOptions {
            with_credentials: self.with_credentials,
            cookie: self.cookie.clone(),
            reconnection_attempts: self.reconnection_attempts,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnection_delay: Duration::from_millis(self.reconnection_delay_ms),
            reconnection_delay_max: Duration::from_millis(self.reconnection_delay_max_ms),
            randomization_factor: self.randomization_factor,
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Pick the endpoint: CLI argument, then `SHELLPORT_API_URL`, then the
    /// config file, then the built-in default.
    pub fn resolve_endpoint(&self, cli: Option<&str>) -> String {
        let env = std::env::var(ENDPOINT_ENV).ok();
        pick_endpoint(cli, env.as_deref(), &self.default.endpoint)
    }
}

fn pick_endpoint(cli: Option<&str>, env: Option<&str>, file: &str) -> String {
    [cli, env, Some(file)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ENDPOINT)
        .to_string()
}
