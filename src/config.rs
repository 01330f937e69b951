//! Configuration loading for verdandi.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (`--config <path>` in the CLI)
//! 2. `~/.verdandi/config.toml` (user)
//! 3. `/etc/verdandi/config.toml` (system)
//! 4. built-in defaults
//!
//! Environment variables are applied on top of whatever was loaded:
//!
//! | Variable | Setting |
//! |---|---|
//! | `VERDANDI_SERVICE_URL` | `service.url` |
//! | `VERDANDI_REQUEST_TIMEOUT_MS` | `service.request_timeout_ms` |
//! | `VERDANDI_CACHE_TTL_SECS` | `cache.fresh_ttl_secs` |
//! | `VERDANDI_CACHE_STALE_SECS` | `cache.stale_ceiling_secs` |
//! | `VERDANDI_CACHE_MAX_ENTRIES` | `cache.max_entries` |
//! | `VERDANDI_REFRESH_MAX_CONCURRENT` | `refresh.max_concurrent` |
//! | `VERDANDI_PREWARM_KEYS` | `prewarm.keys` (comma-separated) |

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::breaker::BreakerConfig;
use crate::cache::CacheConfig;
use crate::refresh::RefreshConfig;
use crate::source::DEFAULT_BASE_URL;
use crate::{Result, VerdandiError};

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub cache: CacheSection,
    /// Breaker guarding resolve calls.
    #[serde(default)]
    pub breaker: BreakerSection,
    /// Breaker guarding conversion recording; unset values fall back to the
    /// lenient profile rather than to `[breaker]`.
    #[serde(default)]
    pub conversion_breaker: BreakerSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub prewarm: PrewarmConfig,
}

/// Configuration service endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL (default: http://127.0.0.1:8080).
    #[serde(default = "default_service_url")]
    pub url: String,
    /// Per-request timeout in milliseconds (default: 5000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_service_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

/// Cache sizing and expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Freshness TTL in seconds (default: 300).
    #[serde(default = "default_fresh_ttl_secs")]
    pub fresh_ttl_secs: u64,
    /// Stale ceiling in seconds (default: 3600).
    #[serde(default = "default_stale_ceiling_secs")]
    pub stale_ceiling_secs: u64,
    /// Maximum entries before LRU eviction (default: 100).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            fresh_ttl_secs: default_fresh_ttl_secs(),
            stale_ceiling_secs: default_stale_ceiling_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_fresh_ttl_secs() -> u64 {
    300
}

fn default_stale_ceiling_secs() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    100
}

/// Breaker overrides. Unset values keep the profile's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakerSection {
    pub timeout_ms: Option<u64>,
    pub error_threshold_percentage: Option<u8>,
    pub reset_timeout_secs: Option<u64>,
    pub volume_threshold: Option<u32>,
    pub rolling_window_secs: Option<u64>,
}

impl BreakerSection {
    fn apply(&self, mut config: BreakerConfig) -> BreakerConfig {
        if let Some(ms) = self.timeout_ms {
            config = config.timeout(Duration::from_millis(ms));
        }
        if let Some(pct) = self.error_threshold_percentage {
            config = config.error_threshold_percentage(pct);
        }
        if let Some(secs) = self.reset_timeout_secs {
            config = config.reset_timeout(Duration::from_secs(secs));
        }
        if let Some(n) = self.volume_threshold {
            config = config.volume_threshold(n);
        }
        if let Some(secs) = self.rolling_window_secs {
            config = config.rolling_window(Duration::from_secs(secs));
        }
        config
    }
}

/// Background refresh limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSection {
    /// Concurrent refreshes (default: 3).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// First retry delay in milliseconds (default: 1000).
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    /// Retry delay cap in milliseconds (default: 30000).
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Per-task deadline in seconds (default: 120).
    #[serde(default = "default_max_refresh_duration_secs")]
    pub max_refresh_duration_secs: u64,
    /// Waiting tasks before the oldest is dropped (default: 50).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retry_attempts: default_max_retry_attempts(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            max_refresh_duration_secs: default_max_refresh_duration_secs(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_max_refresh_duration_secs() -> u64 {
    120
}

fn default_max_queue_size() -> usize {
    50
}

/// Names refreshed in both thinking modes when the service recovers.
///
/// Empty by default: recovery then refreshes nothing, and cached entries
/// are only renewed by requests. List the hot names to keep them warm:
///
/// ```toml
/// [prewarm]
/// keys = ["summarize", "chat"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrewarmConfig {
    #[serde(default)]
    pub keys: Vec<String>,
}

impl ClientConfig {
    /// Load configuration from the standard locations, apply environment
    /// overrides and validate the result.
    ///
    /// An explicit path must exist; otherwise a missing file means defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => {
                debug!(?path, "loading configuration");
                Self::load_from_file(&path)?
            }
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            VerdandiError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            VerdandiError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(VerdandiError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".verdandi").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/verdandi/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply `VERDANDI_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `VERDANDI_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VERDANDI_SERVICE_URL") {
            self.service.url = url;
        }
        if let Some(ms) = parse_env(&lookup, "VERDANDI_REQUEST_TIMEOUT_MS")? {
            self.service.request_timeout_ms = ms;
        }
        if let Some(secs) = parse_env(&lookup, "VERDANDI_CACHE_TTL_SECS")? {
            self.cache.fresh_ttl_secs = secs;
        }
        if let Some(secs) = parse_env(&lookup, "VERDANDI_CACHE_STALE_SECS")? {
            self.cache.stale_ceiling_secs = secs;
        }
        if let Some(n) = parse_env(&lookup, "VERDANDI_CACHE_MAX_ENTRIES")? {
            self.cache.max_entries = n;
        }
        if let Some(n) = parse_env(&lookup, "VERDANDI_REFRESH_MAX_CONCURRENT")? {
            self.refresh.max_concurrent = n;
        }
        if let Some(keys) = lookup("VERDANDI_PREWARM_KEYS") {
            self.prewarm.keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// Reject values the runtime components cannot honour.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.service.url).map_err(|e| {
            VerdandiError::Configuration(format!("invalid service url '{}': {e}", self.service.url))
        })?;
        if self.service.request_timeout_ms == 0 {
            return Err(VerdandiError::Configuration(
                "service request_timeout_ms must be positive".into(),
            ));
        }
        self.cache_config().validate()?;
        self.breaker_config().validate()?;
        self.conversion_breaker_config().validate()?;
        self.refresh_config().validate()
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .fresh_ttl(Duration::from_secs(self.cache.fresh_ttl_secs))
            .stale_ceiling(Duration::from_secs(self.cache.stale_ceiling_secs))
            .max_entries(self.cache.max_entries)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        self.breaker.apply(BreakerConfig::default())
    }

    pub fn conversion_breaker_config(&self) -> BreakerConfig {
        self.conversion_breaker.apply(BreakerConfig::lenient())
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        let refresh = &self.refresh;
        RefreshConfig::new()
            .max_concurrent(refresh.max_concurrent)
            .max_retry_attempts(refresh.max_retry_attempts)
            .base_retry_delay(Duration::from_millis(refresh.base_retry_delay_ms))
            .max_retry_delay(Duration::from_millis(refresh.max_retry_delay_ms))
            .max_refresh_duration(Duration::from_secs(refresh.max_refresh_duration_secs))
            .max_queue_size(refresh.max_queue_size)
    }
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            VerdandiError::Configuration(format!("invalid value for {name} ('{raw}'): {e}"))
        }),
    }
}
