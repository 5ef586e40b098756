//! Configuration management for vrouter.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use vrouter_common::SubnetBlock;
use vrouter_common::constants::{
    DEFAULT_REGISTRY_PREFIX, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS,
    DEFAULT_STATUS_ADDR, DEFAULT_STORE_URL, DEFAULT_SUBNET, LIVENESS_TTL_SECS,
};

use crate::lease;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Coordination store URL (redis://, rediss:// or memory://)
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Root of every key vrouter writes
    #[serde(default = "default_registry_prefix")]
    pub registry_prefix: String,

    /// Daemon status HTTP listen address
    #[serde(default = "default_status_addr")]
    pub status_addr: String,

    /// Timeout applied to every store request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Parent block used by `init` when --cellnet is absent
    #[serde(default = "default_subnet")]
    pub default_cellnet: String,

    /// Overlay block used by `init` when --overlay is absent
    #[serde(default = "default_subnet")]
    pub default_overlay: String,

    /// Liveness lease configuration
    #[serde(default)]
    pub lease: LeaseConfig,
}

/// Liveness lease configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    /// Liveness key TTL in seconds
    #[serde(default = "default_lease_ttl")]
    pub ttl_secs: u64,

    /// Pause between renewal attempts after a connection error
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lease_ttl(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// `VROUTER__LEASE__TTL_SECS=9` sets `lease.ttl_secs`
fn environment() -> config::Environment {
    config::Environment::with_prefix("VROUTER")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

// Default value functions
fn default_store_url() -> String { DEFAULT_STORE_URL.to_string() }
fn default_registry_prefix() -> String { DEFAULT_REGISTRY_PREFIX.to_string() }
fn default_status_addr() -> String { DEFAULT_STATUS_ADDR.to_string() }
fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_MS }
fn default_subnet() -> String { DEFAULT_SUBNET.to_string() }
fn default_lease_ttl() -> u64 { LIVENESS_TTL_SECS }
fn default_retry_backoff() -> u64 { DEFAULT_RETRY_BACKOFF_MS }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        if !Path::new(config_path).exists() {
            tracing::warn!(path = %config_path, "Config file not found, using defaults and environment");
        }
        let mut config = Self::from_sources(config_path, environment())?;

        // Apply CLI overrides
        if let Some(ref store_url) = args.store_url {
            config.store_url = store_url.clone();
        }
        if let Some(ref prefix) = args.prefix {
            config.registry_prefix = prefix.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Optional config file overlaid by `VROUTER__*` variables; serde defaults fill the rest
    fn from_sources(config_path: &str, env: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(env)
            .build()
            .context("Failed to load config file")?
            .try_deserialize()
            .context("Failed to parse config")
    }

    /// Reject settings the coordination core cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.registry_prefix.starts_with('/') {
            bail!("registry_prefix must be absolute, got '{}'", self.registry_prefix);
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be positive");
        }

        lease::renewal_interval(self.lease.ttl())
            .context("Invalid lease.ttl_secs")?;

        self.default_cellnet
            .parse::<SubnetBlock>()
            .context("Invalid default_cellnet")?;
        self.default_overlay
            .parse::<SubnetBlock>()
            .context("Invalid default_overlay")?;

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            registry_prefix: default_registry_prefix(),
            status_addr: default_status_addr(),
            request_timeout_ms: default_request_timeout(),
            default_cellnet: default_subnet(),
            default_overlay: default_subnet(),
            lease: LeaseConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease.ttl(), Duration::from_secs(5));
        assert_eq!(config.registry_prefix, "/vrouter");
    }

    #[test]
    fn test_rejects_unrenewable_ttl() {
        let mut config = AppConfig::default();
        config.lease.ttl_secs = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_relative_prefix() {
        let config = AppConfig {
            registry_prefix: "vrouter".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_default_subnet() {
        let config = AppConfig {
            default_cellnet: "10.0.0.0/40".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "store_url = \"memory://\"\n[lease]\nttl_secs = 9\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.store_url, "memory://");
        assert_eq!(config.lease.ttl_secs, 9);
        assert_eq!(config.lease.retry_backoff_ms, DEFAULT_RETRY_BACKOFF_MS);
        assert_eq!(config.status_addr, DEFAULT_STATUS_ADDR);
    }

    #[test]
    fn test_environment_applies_without_file() {
        let vars = config::Map::from([
            ("VROUTER__LEASE__TTL_SECS".to_string(), "9".to_string()),
            ("VROUTER__STORE_URL".to_string(), "memory://".to_string()),
        ]);
        let config =
            AppConfig::from_sources("does/not/exist.toml", environment().source(Some(vars))).unwrap();
        assert_eq!(config.lease.ttl_secs, 9);
        assert_eq!(config.store_url, "memory://");
        assert_eq!(config.registry_prefix, DEFAULT_REGISTRY_PREFIX);
    }
}
