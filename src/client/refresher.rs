//! Glue between the refresh manager, the cache and the breaker.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::ClientInner;
use crate::breaker::{BreakerEvent, BreakerListener, CircuitBreaker, CircuitState};
use crate::cache::CacheStore;
use crate::refresh::RefreshHandler;
use crate::traits::ConfigSource;
use crate::{CacheKey, Result, VerdandiError};

/// Re-resolves a key through the breaker and writes the result into the
/// cache. The cache's in-progress markers double as the manager's claims.
pub(crate) struct CacheRefresher {
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) source: Arc<dyn ConfigSource>,
    pub(crate) breaker: Arc<CircuitBreaker>,
}

#[async_trait]
impl RefreshHandler<CacheKey> for CacheRefresher {
    fn mark_in_progress(&self, key: &CacheKey) -> bool {
        self.cache.mark_refresh_in_progress(key)
    }

    fn clear_in_progress(&self, key: &CacheKey) {
        self.cache.clear_refresh_in_progress(key)
    }

    async fn execute(&self, key: &CacheKey) -> Result<()> {
        let resolved = self.breaker.call(|| self.source.resolve(key)).await?;
        self.cache
            .set(key.clone(), Arc::new(resolved.config), resolved.variant_id);
        Ok(())
    }

    /// Unknown keys and rejected requests will not heal by repetition.
    fn should_retry(&self, _key: &CacheKey, error: &VerdandiError) -> bool {
        error.is_transient()
    }

    /// Attempts against an open circuit would only be rejected; the
    /// recovery pre-warm reschedules the key once the service is back.
    fn should_halt(&self, _key: &CacheKey) -> bool {
        self.breaker.state() == CircuitState::Open
    }

    fn on_success(&self, key: &CacheKey) {
        debug!(%key, "cache entry refreshed in background");
    }

    fn on_failure(&self, key: &CacheKey, attempts: u32) {
        warn!(%key, attempts, "background refresh exhausted retries, keeping stale entry");
    }

    fn on_timeout(&self, key: &CacheKey, elapsed: Duration) {
        warn!(
            %key,
            elapsed_ms = elapsed.as_millis() as u64,
            "background refresh timed out, keeping stale entry"
        );
    }

    fn on_dropped(&self, key: &CacheKey) {
        debug!(%key, "background refresh dropped from full queue");
    }
}

/// Schedules the pre-warm keys when the resolve breaker closes again.
///
/// Holds the client weakly: the breaker outlives the client in the
/// registry and must not keep it alive.
pub(crate) struct PrewarmOnRecovery {
    pub(crate) client: Weak<ClientInner>,
}

impl BreakerListener for PrewarmOnRecovery {
    fn on_event(&self, breaker: &str, event: BreakerEvent) {
        if event != BreakerEvent::Close {
            return;
        }
        let Some(client) = self.client.upgrade() else {
            return;
        };
        info!(
            breaker,
            keys = client.prewarm.len(),
            "configuration service recovered, pre-warming cache"
        );
        client.schedule_prewarm();
    }
}
