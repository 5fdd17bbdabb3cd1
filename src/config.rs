//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{
    validate_schedule, ClientRegistry, Janitor, Policy, DEFAULT_BURST_SIZE,
    DEFAULT_REQUESTS_PER_SECOND,
};

/// Prefix for environment variable overrides, e.g.
/// `TURNSTILE__LIMITER__REQUESTS_PER_SECOND=5`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Deployment environment (development|staging|production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            environment: default_environment(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_environment() -> String {
    "development".to_string()
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Whether rate limiting is applied at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Sustained requests per second allowed per client
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Requests a client may issue back-to-back
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Seconds between idle-client sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds of inactivity after which a client is forgotten
    #[serde(default = "default_idle_eviction")]
    pub idle_eviction_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            sweep_interval_secs: default_sweep_interval(),
            idle_eviction_secs: default_idle_eviction(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_second() -> f64 {
    DEFAULT_REQUESTS_PER_SECOND
}

fn default_burst_size() -> u32 {
    DEFAULT_BURST_SIZE
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_eviction() -> u64 {
    180
}

impl LimiterConfig {
    /// Get the sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Get the idle eviction threshold as a duration.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    /// Build the admission policy.
    pub fn policy(&self) -> Result<Policy> {
        Ok(Policy::new(self.requests_per_second, self.burst_size)?.with_enabled(self.enabled))
    }

    /// Build a janitor sweeping `registry` on this schedule.
    pub fn janitor(&self, registry: Arc<ClientRegistry>) -> Result<Janitor> {
        Janitor::new(registry, self.sweep_interval(), self.idle_threshold())
    }

    /// Validate the limiter settings.
    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        validate_schedule(self.sweep_interval(), self.idle_threshold())
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load layered configuration: defaults, then the optional YAML file,
    /// then `TURNSTILE__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.environment.trim().is_empty() {
            return Err(TurnstileError::Config(
                "environment must not be empty".to_string(),
            ));
        }
        self.limiter.validate()
    }
}
