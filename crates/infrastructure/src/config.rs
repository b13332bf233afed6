//! Agent configuration: structs, parsing, and validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use domain::fqdn::entity::FqdnControllerOptions;

/// Environment variables exposing the cluster DNS Service endpoint.
pub const KUBE_DNS_SERVICE_HOST: &str = "KUBE_DNS_SERVICE_HOST";
pub const KUBE_DNS_SERVICE_PORT: &str = "KUBE_DNS_SERVICE_PORT";

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

fn validation(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.into(),
    }
}

// ── Logging enums ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub fqdn: FqdnConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            fqdn: FqdnConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fqdn.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Text
}

// ── FQDN controller section ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FqdnConfig {
    #[serde(default = "default_true")]
    pub enable_ipv4: bool,

    #[serde(default)]
    pub enable_ipv6: bool,

    /// Floor applied to every record TTL (seconds). Set it above the
    /// longest client-side DNS caching expected in the cluster.
    #[serde(default)]
    pub min_ttl_secs: u32,

    /// Explicit DNS server endpoint (`host:port`). When unset, the
    /// cluster DNS Service environment is used, then the host resolver.
    #[serde(default)]
    pub dns_server_override: Option<String>,

    #[serde(default = "default_query_workers")]
    pub query_workers: usize,

    #[serde(default = "default_min_retry_delay")]
    pub min_retry_delay_secs: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_secs: u64,
}

impl Default for FqdnConfig {
    fn default() -> Self {
        Self {
            enable_ipv4: true,
            enable_ipv6: false,
            min_ttl_secs: 0,
            dns_server_override: None,
            query_workers: default_query_workers(),
            min_retry_delay_secs: default_min_retry_delay(),
            max_retry_delay_secs: default_max_retry_delay(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_query_workers() -> usize {
    2
}
fn default_min_retry_delay() -> u64 {
    5
}
fn default_max_retry_delay() -> u64 {
    300
}

impl FqdnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enable_ipv4 && !self.enable_ipv6 {
            return Err(validation(
                "fqdn.enable_ipv4",
                "at least one address family must be enabled",
            ));
        }
        if self.query_workers == 0 || self.query_workers > 64 {
            return Err(validation(
                "fqdn.query_workers",
                "must be between 1 and 64",
            ));
        }
        if self.min_retry_delay_secs == 0 {
            return Err(validation("fqdn.min_retry_delay_secs", "must be >= 1"));
        }
        if self.max_retry_delay_secs < self.min_retry_delay_secs {
            return Err(validation(
                "fqdn.max_retry_delay_secs",
                "must be >= fqdn.min_retry_delay_secs",
            ));
        }
        if let Some(addr) = &self.dns_server_override {
            validate_host_port(addr)
                .map_err(|message| validation("fqdn.dns_server_override", message))?;
        }
        Ok(())
    }

    pub fn to_controller_options(&self) -> FqdnControllerOptions {
        FqdnControllerOptions {
            ipv4_enabled: self.enable_ipv4,
            ipv6_enabled: self.enable_ipv6,
            min_ttl_secs: self.min_ttl_secs,
            query_workers: self.query_workers,
            min_retry_delay: Duration::from_secs(self.min_retry_delay_secs),
            max_retry_delay: Duration::from_secs(self.max_retry_delay_secs),
        }
    }

    /// The DNS server the controller should query: the explicit
    /// override, else the cluster DNS Service from the environment,
    /// else `None` (host resolver fallback).
    pub fn resolve_dns_server(&self) -> Option<String> {
        self.resolve_dns_server_from(|name| std::env::var(name).ok())
    }

    /// Same as [`resolve_dns_server`](Self::resolve_dns_server) with an
    /// injectable environment, for tests.
    pub fn resolve_dns_server_from(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        if let Some(addr) = &self.dns_server_override {
            tracing::info!(dns_server = %addr, "DNS server override provided by user");
            return Some(addr.clone());
        }
        let host = env(KUBE_DNS_SERVICE_HOST).filter(|h| !h.is_empty());
        let port = env(KUBE_DNS_SERVICE_PORT).filter(|p| !p.is_empty());
        match (host, port) {
            (Some(host), Some(port)) => {
                let addr = join_host_port(&host, &port);
                tracing::info!(dns_server = %addr, "using cluster DNS Service for DNS requests");
                Some(addr)
            }
            _ => {
                tracing::info!(
                    "unable to derive a DNS server from the cluster DNS Service, \
                     falling back to the host resolver"
                );
                None
            }
        }
    }
}

fn validate_host_port(addr: &str) -> Result<(), String> {
    if addr.parse::<std::net::SocketAddr>().is_ok() {
        return Ok(());
    }
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err("expected host:port".to_string());
    };
    if host.is_empty() {
        return Err("empty host".to_string());
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port '{port}'")),
        Ok(_) => Ok(()),
    }
}

/// Join a host and port, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

// ── Tests ───────────────────────────────────────────────────────────
