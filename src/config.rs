//! Configuration management for Ratewarden.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatewardenError, Result};
use crate::ratelimit::{RuleConfig, RuleSet, StoreOptions};

/// Prefix for environment overrides, e.g. `RATEWARDEN__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Rules mounted by the server
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Header carrying a principal already authenticated upstream
    #[serde(default)]
    pub principal_header: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            log_json: false,
            principal_header: None,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Hard cap on timestamps retained per partition
    #[serde(default = "default_max_entries")]
    pub max_entries_per_partition: usize,

    /// Inactivity in seconds after which a partition is swept
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Seconds between sweep passes
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Key origins on `X-Forwarded-For` rather than the peer address
    #[serde(default = "default_trust_forwarded_for")]
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_entries_per_partition: default_max_entries(),
            stale_after_secs: default_stale_after(),
            sweep_interval_secs: default_sweep_interval(),
            trust_forwarded_for: default_trust_forwarded_for(),
        }
    }
}

fn default_max_entries() -> usize {
    1000
}

fn default_stale_after() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_trust_forwarded_for() -> bool {
    true
}

impl RateLimitingConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_entries_per_partition: self.max_entries_per_partition,
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RatewardenConfig {
    /// Load configuration from a file, layered with environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let config: RatewardenConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RatewardenConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the limiter misbehave.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.rate_limiting;

        if limits.max_entries_per_partition == 0 {
            return Err(RatewardenError::Config(
                "max_entries_per_partition must be positive".into(),
            ));
        }
        if limits.stale_after_secs == 0 {
            return Err(RatewardenError::Config("stale_after_secs must be positive".into()));
        }
        if limits.sweep_interval_secs == 0 {
            return Err(RatewardenError::Config(
                "sweep_interval_secs must be positive".into(),
            ));
        }

        if let Some(name) = &self.server.principal_header {
            axum::http::HeaderName::try_from(name.as_str()).map_err(|e| {
                RatewardenError::Config(format!("invalid principal_header '{}': {}", name, e))
            })?;
        }

        self.rule_set().map(|_| ())
    }

    /// The configured rules, validated.
    pub fn rule_set(&self) -> Result<RuleSet> {
        RuleSet::from_configs(self.rules.clone())
    }
}
