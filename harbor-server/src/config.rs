//! Server configuration
//!
//! Loaded from `HARBOR_*` environment variables. Durations accept
//! humantime syntax such as `500ms`, `5s` or `1m`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,

    /// Address on-demand runners are told to dial back to
    pub advertise_addr: String,

    /// Whether the advertised address speaks TLS
    pub advertise_tls: bool,

    /// Whether on-demand runners should skip TLS verification
    pub advertise_tls_skip_verify: bool,

    /// Run the poll queuer loops
    pub poll_enabled: bool,

    /// Running jobs without a heartbeat for this long are errored
    pub heartbeat_timeout: Duration,

    /// How often the reaper looks for expired or silent jobs
    pub reaper_interval: Duration,

    /// Delay before re-peeking after a poll handler failure
    pub poll_backoff: Duration,

    /// Pre-registered operator login token
    pub bootstrap_token: Option<String>,
}

impl ServerConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - HARBOR_BIND_ADDR (default: 0.0.0.0:9701)
    /// - HARBOR_ADVERTISE_ADDR (default: localhost:9701)
    /// - HARBOR_ADVERTISE_TLS (default: false)
    /// - HARBOR_ADVERTISE_TLS_SKIP_VERIFY (default: false)
    /// - HARBOR_POLL_ENABLED (default: true)
    /// - HARBOR_HEARTBEAT_TIMEOUT (default: 60s)
    /// - HARBOR_REAPER_INTERVAL (default: 5s)
    /// - HARBOR_POLL_BACKOFF (default: 1s)
    /// - HARBOR_BOOTSTRAP_TOKEN
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = match env("HARBOR_BIND_ADDR") {
            Some(addr) => addr
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid HARBOR_BIND_ADDR: {addr}"))?,
            None => defaults.bind_addr,
        };

        Ok(Self {
            bind_addr,
            advertise_addr: env("HARBOR_ADVERTISE_ADDR").unwrap_or(defaults.advertise_addr),
            advertise_tls: env_bool("HARBOR_ADVERTISE_TLS")?.unwrap_or(defaults.advertise_tls),
            advertise_tls_skip_verify: env_bool("HARBOR_ADVERTISE_TLS_SKIP_VERIFY")?
                .unwrap_or(defaults.advertise_tls_skip_verify),
            poll_enabled: env_bool("HARBOR_POLL_ENABLED")?.unwrap_or(defaults.poll_enabled),
            heartbeat_timeout: env_duration("HARBOR_HEARTBEAT_TIMEOUT")?
                .unwrap_or(defaults.heartbeat_timeout),
            reaper_interval: env_duration("HARBOR_REAPER_INTERVAL")?
                .unwrap_or(defaults.reaper_interval),
            poll_backoff: env_duration("HARBOR_POLL_BACKOFF")?.unwrap_or(defaults.poll_backoff),
            bootstrap_token: env("HARBOR_BOOTSTRAP_TOKEN"),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.advertise_addr.trim().is_empty() {
            anyhow::bail!("advertise_addr cannot be empty");
        }

        if self.heartbeat_timeout.is_zero() {
            anyhow::bail!("heartbeat_timeout must be greater than 0");
        }

        if self.reaper_interval.is_zero() {
            anyhow::bail!("reaper_interval must be greater than 0");
        }

        if self.poll_backoff.is_zero() {
            anyhow::bail!("poll_backoff must be greater than 0");
        }

        if self.bootstrap_token.as_deref().is_some_and(|t| t.len() < 16) {
            anyhow::bail!("bootstrap_token must be at least 16 characters");
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9701)),
            advertise_addr: "localhost:9701".to_string(),
            advertise_tls: false,
            advertise_tls_skip_verify: false,
            poll_enabled: true,
            heartbeat_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(5),
            poll_backoff: Duration::from_secs(1),
            bootstrap_token: None,
        }
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(name: &str) -> anyhow::Result<Option<bool>> {
    env(name)
        .map(|v| parse_bool(&v).with_context(|| format!("invalid {name}: {v}")))
        .transpose()
}

fn env_duration(name: &str) -> anyhow::Result<Option<Duration>> {
    env(name)
        .map(|v| humantime::parse_duration(&v).with_context(|| format!("invalid {name}: {v}")))
        .transpose()
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}
