//! The resolution client.
//!
//! [`ResolutionClient`] is what the rest of an application talks to. Per
//! request it:
//!
//! 1. serves a fresh cache entry without touching the network,
//! 2. fails fast with [`VerdandiError::ServiceUnavailable`] while the resolve
//!    circuit is open,
//! 3. otherwise calls the [`ConfigSource`] through the circuit breaker and
//!    writes the result through to the cache,
//! 4. on failure falls back to a stale cache entry and schedules a
//!    background refresh, or reports the service unavailable when nothing
//!    is cached.
//!
//! When the resolve circuit closes after an outage, the configured pre-warm
//! keys are refreshed in the background.

mod builder;
mod refresher;

pub use builder::ResolutionClientBuilder;

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
use crate::cache::{CacheEntry, CacheStats, CacheStore, Lookup};
use crate::refresh::BackgroundRefreshManager;
use crate::traits::ConfigSource;
use crate::{
    CacheKey, ClientConfig, Resolution, ResolutionSource, ResolvedConfig, Result, VerdandiError,
    telemetry,
};

/// Registry name of the breaker guarding resolve calls.
pub const RESOLVE_BREAKER: &str = "config-resolve";

/// Registry name of the breaker guarding conversion recording.
pub const CONVERSION_BREAKER: &str = "config-conversion";

pub(crate) struct ClientInner {
    cache: Arc<CacheStore>,
    source: Arc<dyn ConfigSource>,
    breaker: Arc<CircuitBreaker>,
    conversion_breaker: Arc<CircuitBreaker>,
    refresh: BackgroundRefreshManager<CacheKey>,
    registry: Arc<BreakerRegistry>,
    prewarm: Vec<CacheKey>,
}

impl ClientInner {
    fn schedule_prewarm(&self) {
        for key in &self.prewarm {
            self.refresh.schedule(key.clone());
        }
    }
}

/// Resilient client for the configuration service.
///
/// Cloning is cheap; clones share the cache, breakers and refresh manager.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use verdandi::{BreakerRegistry, ClientConfig, ResolutionClient};
/// # async fn example() -> verdandi::Result<()> {
/// let registry = Arc::new(BreakerRegistry::new());
/// let client = ResolutionClient::from_config(&ClientConfig::default(), registry)?;
///
/// let resolution = client.resolve("summarize", false).await?;
/// println!("{} via {}", resolution.config.model, resolution.source.as_str());
///
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResolutionClient {
    inner: Arc<ClientInner>,
}

impl ResolutionClient {
    pub fn builder() -> ResolutionClientBuilder {
        ResolutionClientBuilder::new()
    }

    /// Build a client talking HTTP to the service named in `config`.
    pub fn from_config(config: &ClientConfig, registry: Arc<BreakerRegistry>) -> Result<Self> {
        ResolutionClientBuilder::from_config(config)?
            .registry(registry)
            .build()
    }

    /// Resolve the configuration for `name` in the given thinking mode.
    pub async fn resolve(&self, name: &str, thinking: bool) -> Result<Resolution> {
        self.resolve_key(&CacheKey::new(name, thinking)).await
    }

    /// Resolve the configuration for `key`.
    ///
    /// Only [`VerdandiError::ServiceUnavailable`] is returned; transport and
    /// breaker errors are folded into it.
    pub async fn resolve_key(&self, key: &CacheKey) -> Result<Resolution> {
        let inner = &self.inner;

        let stale = match inner.cache.lookup(key) {
            Lookup::Fresh(entry) => {
                debug!(%key, "serving fresh cache entry");
                return Ok(served(entry, ResolutionSource::Fresh));
            }
            Lookup::Stale(entry) => Some(entry),
            Lookup::Missing => None,
        };

        if inner.breaker.state() == CircuitState::Open {
            debug!(%key, breaker = inner.breaker.name(), "circuit open, failing fast");
            count_unavailable();
            return Err(VerdandiError::unavailable(format!(
                "circuit '{}' is open",
                inner.breaker.name()
            )));
        }

        let started = Instant::now();
        let result = inner.breaker.call(|| inner.source.resolve(key)).await;
        metrics::histogram!(telemetry::RESOLVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(resolved) => Ok(self.store_live(key, resolved)),
            Err(e) => self.fall_back(key, stale, e),
        }
    }

    fn store_live(&self, key: &CacheKey, resolved: ResolvedConfig) -> Resolution {
        let ResolvedConfig {
            config,
            ab_test_id,
            variant_id,
        } = resolved;
        let config = Arc::new(config);
        self.inner
            .cache
            .set(key.clone(), Arc::clone(&config), variant_id.clone());

        if let Some(variant_id) = &variant_id {
            self.record_conversion(variant_id);
        }

        debug!(%key, model = %config.model, "resolved configuration from service");
        metrics::counter!(telemetry::RESOLUTIONS_TOTAL, "source" => ResolutionSource::Live.as_str())
            .increment(1);
        Resolution {
            config,
            variant_id,
            ab_test_id,
            source: ResolutionSource::Live,
            age: std::time::Duration::ZERO,
        }
    }

    /// Serve the entry classified stale before the live call, unless the
    /// call took long enough to push it past the ceiling.
    fn fall_back(
        &self,
        key: &CacheKey,
        stale: Option<CacheEntry>,
        error: VerdandiError,
    ) -> Result<Resolution> {
        let inner = &self.inner;
        let ceiling = inner.cache.config().stale_ceiling;
        match stale.filter(|entry| entry.age() <= ceiling) {
            Some(entry) => {
                inner.refresh.schedule(key.clone());
                warn!(
                    %key,
                    age_secs = entry.age().as_secs(),
                    error = %error,
                    "configuration service call failed, serving stale entry"
                );
                Ok(served(entry, ResolutionSource::Stale))
            }
            None => {
                warn!(%key, error = %error, "configuration service call failed, nothing cached");
                count_unavailable();
                Err(VerdandiError::unavailable(format!(
                    "no cached configuration for '{key}': {error}"
                )))
            }
        }
    }

    /// Record a conversion for `variant_id` in the background.
    ///
    /// Goes through the lenient conversion breaker. The outcome is only
    /// logged and counted. Must be called within a tokio runtime.
    pub fn record_conversion(&self, variant_id: &str) {
        let source = Arc::clone(&self.inner.source);
        let breaker = Arc::clone(&self.inner.conversion_breaker);
        let variant_id = variant_id.to_string();

        let handle = tokio::spawn(async move {
            match breaker.call(|| source.record_conversion(&variant_id)).await {
                Ok(()) => {
                    debug!(variant_id, "conversion recorded");
                    metrics::counter!(telemetry::CONVERSIONS_TOTAL, "status" => "ok").increment(1);
                }
                Err(e) => {
                    warn!(variant_id, error = %e, "failed to record conversion");
                    metrics::counter!(telemetry::CONVERSIONS_TOTAL, "status" => "error")
                        .increment(1);
                }
            }
        });
        // Detached: nobody awaits the outcome.
        drop(handle);
    }

    /// Probe the service's health endpoint. Never errors; bounded by the
    /// resolve breaker's call timeout and not counted by the breaker.
    pub async fn health_check(&self) -> bool {
        let timeout = self.inner.breaker.config().timeout;
        match tokio::time::timeout(timeout, self.inner.source.health()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(source = self.inner.source.name(), error = %e, "health check failed");
                false
            }
            Err(_) => {
                debug!(source = self.inner.source.name(), "health check timed out");
                false
            }
        }
    }

    /// Schedule background refreshes of every pre-warm key.
    pub fn prewarm(&self) {
        self.inner.schedule_prewarm();
    }

    /// Keys refreshed when the service recovers.
    pub fn prewarm_keys(&self) -> &[CacheKey] {
        &self.inner.prewarm
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    pub fn refresh_manager(&self) -> &BackgroundRefreshManager<CacheKey> {
        &self.inner.refresh
    }

    /// Stop background refreshes, then dispose every breaker in the
    /// registry. Resolutions afterwards are served from the cache only.
    pub async fn shutdown(&self) {
        self.inner.refresh.shutdown().await;
        self.inner.registry.shutdown();
    }
}

fn served(entry: CacheEntry, source: ResolutionSource) -> Resolution {
    metrics::counter!(telemetry::RESOLUTIONS_TOTAL, "source" => source.as_str()).increment(1);
    Resolution {
        age: entry.age(),
        config: entry.config,
        variant_id: entry.variant_id,
        ab_test_id: None,
        source,
    }
}

fn count_unavailable() {
    metrics::counter!(telemetry::RESOLUTIONS_TOTAL, "source" => "unavailable").increment(1);
}
