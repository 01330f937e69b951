//! Builder for configuring client instances

use std::sync::Arc;

use super::refresher::{CacheRefresher, PrewarmOnRecovery};
use super::{CONVERSION_BREAKER, ClientInner, RESOLVE_BREAKER, ResolutionClient};
use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::cache::{CacheConfig, CacheStore};
use crate::refresh::{BackgroundRefreshManager, RefreshConfig};
use crate::source::HttpConfigSource;
use crate::traits::ConfigSource;
use crate::{CacheKey, ClientConfig, Result, VerdandiError};

/// Builder for [`ResolutionClient`].
///
/// Only a source is required. Without an explicit registry the client gets
/// a private one.
pub struct ResolutionClientBuilder {
    source: Option<Arc<dyn ConfigSource>>,
    registry: Option<Arc<BreakerRegistry>>,
    cache: CacheConfig,
    breaker: BreakerConfig,
    conversion_breaker: BreakerConfig,
    refresh: RefreshConfig,
    prewarm: Vec<String>,
}

impl ResolutionClientBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            registry: None,
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            conversion_breaker: BreakerConfig::lenient(),
            refresh: RefreshConfig::default(),
            prewarm: Vec::new(),
        }
    }

    /// Start from a [`ClientConfig`], with an [`HttpConfigSource`] pointed at
    /// its service URL.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let source = HttpConfigSource::new(&config.service.url, config.service.request_timeout())?;
        Ok(Self::new()
            .source(source)
            .cache_config(config.cache_config())
            .breaker_config(config.breaker_config())
            .conversion_breaker_config(config.conversion_breaker_config())
            .refresh_config(config.refresh_config())
            .prewarm(config.prewarm.keys.iter().cloned()))
    }

    pub fn source(self, source: impl ConfigSource + 'static) -> Self {
        self.shared_source(Arc::new(source))
    }

    pub fn shared_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Registry the client registers its breakers in and disposes on
    /// shutdown.
    pub fn registry(mut self, registry: Arc<BreakerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn conversion_breaker_config(mut self, config: BreakerConfig) -> Self {
        self.conversion_breaker = config;
        self
    }

    pub fn refresh_config(mut self, config: RefreshConfig) -> Self {
        self.refresh = config;
        self
    }

    /// Configuration names refreshed (in both thinking modes) when the
    /// service recovers from an outage.
    pub fn prewarm<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prewarm.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<ResolutionClient> {
        let source = self.source.ok_or_else(|| {
            VerdandiError::Configuration("no configuration source configured".into())
        })?;
        let cache = Arc::new(CacheStore::new(self.cache)?);
        self.breaker.validate()?;
        self.conversion_breaker.validate()?;
        self.refresh.validate()?;

        let registry = self.registry.unwrap_or_default();
        let breaker = registry.register(RESOLVE_BREAKER, self.breaker);
        let conversion_breaker = registry.register(CONVERSION_BREAKER, self.conversion_breaker);

        let refresher = CacheRefresher {
            cache: Arc::clone(&cache),
            source: Arc::clone(&source),
            breaker: Arc::clone(&breaker),
        };
        let refresh = BackgroundRefreshManager::new(self.refresh, Arc::new(refresher));

        let mut prewarm: Vec<CacheKey> = Vec::with_capacity(self.prewarm.len() * 2);
        for name in &self.prewarm {
            for key in CacheKey::both_modes(name) {
                if !prewarm.contains(&key) {
                    prewarm.push(key);
                }
            }
        }

        let inner = Arc::new(ClientInner {
            cache,
            source,
            breaker: Arc::clone(&breaker),
            conversion_breaker,
            refresh,
            registry,
            prewarm,
        });
        breaker.add_listener(Arc::new(PrewarmOnRecovery {
            client: Arc::downgrade(&inner),
        }));

        Ok(ResolutionClient { inner })
    }
}

impl Default for ResolutionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
