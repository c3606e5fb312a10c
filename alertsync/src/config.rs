//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `ALERTSYNC_`, nested keys split on `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/alertsync/config.toml
//! 4. System directory: /etc/alertsync/config.toml
//! 5. Default values
//!
//! `ALERTSYNC_ALERTING__RESEND_INTERVAL_SECS=3600` overrides
//! `alerting.resend_interval_secs`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

const APP_NAME: &str = "alertsync";
const ENV_PREFIX: &str = "ALERTSYNC_";

/// Destination names understood by the adapter registry
pub const KNOWN_DESTINATIONS: &[&str] = &["slack", "pagerduty"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Dedup, resend and sweep windows
    #[serde(default)]
    pub alerting: AlertingConfig,

    /// Retry executor tunables shared by every destination adapter
    #[serde(default)]
    pub retry: RetryConfig,

    /// Discrete-call circuit breaker tunables
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Persistent-connection reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Repository backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Enabled destinations, in fan-out order
    #[serde(default)]
    pub destinations: Vec<String>,

    /// Slack adapter (required when "slack" is enabled)
    #[serde(default)]
    pub slack: Option<SlackConfig>,

    /// PagerDuty adapter (required when "pagerduty" is enabled)
    #[serde(default)]
    pub pagerduty: Option<PagerDutyConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Alert lifecycle windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Re-fires within this window of the last fire are duplicates
    #[serde(default = "default_dedup_window_secs")]
    pub deduplication_window_secs: u64,

    /// Still-firing alerts are re-announced after this long
    #[serde(default = "default_resend_interval_secs")]
    pub resend_interval_secs: u64,

    /// Period of the expired-silence sweeper
    #[serde(default = "default_silence_sweep_secs")]
    pub silence_sweep_interval_secs: u64,
}

impl AlertingConfig {
    pub fn deduplication_window(&self) -> Duration {
        Duration::from_secs(self.deduplication_window_secs)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_secs(self.resend_interval_secs)
    }

    pub fn silence_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.silence_sweep_interval_secs)
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            deduplication_window_secs: default_dedup_window_secs(),
            resend_interval_secs: default_resend_interval_secs(),
            silence_sweep_interval_secs: default_silence_sweep_secs(),
        }
    }
}

/// Retry executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff multiplier applied per retry
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for any single delay in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_retry_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_retry_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Circuit breaker configuration for request/response calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_breaker_max_failures")]
    pub max_failures: u32,

    /// Seconds the circuit stays open before a probe is allowed
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive half-open successes needed to close again
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_breaker_max_failures(),
            timeout_secs: default_breaker_timeout_secs(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Reconnect policy for long-lived streaming connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive failed sessions before giving up for good
    #[serde(default = "default_reconnect_max_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_reconnect_max_failures(),
            initial_delay_ms: default_reconnect_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

/// Repository backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Single-process in-memory store
    #[default]
    Memory,
    /// Single-writer embedded libsql file
    Turso,
    /// Networked PostgreSQL store shared by many instances
    Postgres,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Embedded store settings (required when backend = "turso")
    #[serde(default)]
    pub turso: Option<TursoConfig>,

    /// PostgreSQL settings (required when backend = "postgres")
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Embedded libsql store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TursoConfig {
    /// Database file path
    pub path: PathBuf,

    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum retry attempts for opening the database
    #[serde(default = "default_connect_retries")]
    pub max_retries: u32,

    /// Base delay between open attempts in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum retry attempts for establishing database connection
    #[serde(default = "default_connect_retries")]
    pub max_retries: u32,

    /// Base delay between retry attempts in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

/// Slack Web API adapter
#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`)
    pub bot_token: String,

    /// Channel ID alerts are posted to
    pub channel: String,

    #[serde(default = "default_slack_api_url")]
    pub api_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &"***")
            .field("channel", &self.channel)
            .field("api_base_url", &self.api_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// PagerDuty Events API v2 adapter
#[derive(Clone, Serialize, Deserialize)]
pub struct PagerDutyConfig {
    /// Integration routing key of the target service
    pub routing_key: String,

    #[serde(default = "default_pagerduty_api_url")]
    pub api_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for PagerDutyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagerDutyConfig")
            .field("routing_key", &"***")
            .field("api_base_url", &self.api_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_resend_interval_secs() -> u64 {
    1800
}

fn default_silence_sweep_secs() -> u64 {
    3600
}

fn default_retry_initial_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_breaker_max_failures() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    2
}

fn default_reconnect_max_failures() -> u32 {
    10
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_slack_api_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_pagerduty_api_url() -> String {
    "https://events.pagerduty.com".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found wins per key):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/alertsync/config.toml
    /// 3. System directory: /etc/alertsync/config.toml
    ///
    /// Environment variables (ALERTSYNC_ prefix) override all file-based configs.
    /// The result is validated before it is returned.
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the XDG search path. Environment overrides still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Returns paths in priority order (highest first)
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_NAME);
        if let Some(path) = xdg_dirs.find_config_file("config.toml") {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc").join(APP_NAME).join("config.toml"));
        paths
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        let alerting = &self.alerting;
        if alerting.resend_interval_secs <= alerting.deduplication_window_secs {
            return Err(Error::Validation(format!(
                "alerting.resend_interval_secs ({}) must exceed alerting.deduplication_window_secs ({})",
                alerting.resend_interval_secs, alerting.deduplication_window_secs
            )));
        }
        if alerting.silence_sweep_interval_secs == 0 {
            return Err(Error::Validation(
                "alerting.silence_sweep_interval_secs must be positive".to_string(),
            ));
        }

        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(Error::Validation(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(Error::Validation(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".to_string(),
            ));
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return Err(Error::Validation(format!(
                "reconnect.multiplier must be at least 1.0, got {}",
                self.reconnect.multiplier
            )));
        }
        if self.reconnect.max_consecutive_failures == 0 {
            return Err(Error::Validation(
                "reconnect.max_consecutive_failures must be positive".to_string(),
            ));
        }

        if self.circuit_breaker.max_failures == 0 {
            return Err(Error::Validation(
                "circuit_breaker.max_failures must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(Error::Validation(
                "circuit_breaker.success_threshold must be positive".to_string(),
            ));
        }

        for (position, name) in self.destinations.iter().enumerate() {
            if self.destinations[..position].contains(name) {
                return Err(Error::Validation(format!(
                    "destination '{}' is listed twice",
                    name
                )));
            }
            let configured = match name.as_str() {
                "slack" => self.slack.is_some(),
                "pagerduty" => self.pagerduty.is_some(),
                other => {
                    return Err(Error::Validation(format!(
                        "unknown destination '{}', expected one of {:?}",
                        other, KNOWN_DESTINATIONS
                    )))
                }
            };
            if !configured {
                return Err(Error::Validation(format!(
                    "destination '{}' is enabled but has no [{}] section",
                    name, name
                )));
            }
        }

        match self.storage.backend {
            StorageBackend::Memory => {}
            StorageBackend::Turso if self.storage.turso.is_none() => {
                return Err(Error::Validation(
                    "storage.backend = \"turso\" requires a [storage.turso] section".to_string(),
                ))
            }
            StorageBackend::Postgres if self.storage.database.is_none() => {
                return Err(Error::Validation(
                    "storage.backend = \"postgres\" requires a [storage.database] section"
                        .to_string(),
                ))
            }
            _ => {}
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: APP_NAME.to_string(),
                log_level: default_log_level(),
                environment: default_environment(),
            },
            alerting: AlertingConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            reconnect: ReconnectConfig::default(),
            storage: StorageConfig::default(),
            destinations: Vec::new(),
            slack: None,
            pagerduty: None,
        }
    }
}
