//! ResolutionClient orchestration tests against an in-memory source, on a
//! paused tokio clock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use verdandi::client::{CONVERSION_BREAKER, RESOLVE_BREAKER};
use verdandi::{
    BreakerConfig, BreakerRegistry, CacheConfig, CacheKey, CircuitState, ConfigPayload,
    ConfigSource, RefreshConfig, ResolutionClient, ResolutionSource, ResolvedConfig, Result,
    VerdandiError,
};

const MINUTE: Duration = Duration::from_secs(60);

// ============================================================================
// Mock source
// ============================================================================

#[derive(Default)]
struct MockSource {
    resolve_calls: AtomicU32,
    failing: AtomicBool,
    /// Answer resolves with a permanent 404 instead of a 503.
    unknown_key: AtomicBool,
    failing_conversions: AtomicBool,
    unhealthy: AtomicBool,
    hang_health: AtomicBool,
    /// Simulated latency of each resolve call.
    latency: Duration,
    variant_id: Option<String>,
    conversions: Mutex<Vec<String>>,
}

impl MockSource {
    fn calls(&self) -> u32 {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn conversions(&self) -> Vec<String> {
        self.conversions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, key: &CacheKey) -> Result<ResolvedConfig> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.unknown_key.load(Ordering::SeqCst) {
            return Err(VerdandiError::Api {
                status: 404,
                message: format!("unknown configuration '{}'", key.name()),
            });
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(VerdandiError::Api {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        let model = if key.thinking() {
            "deep-model"
        } else {
            "fast-model"
        };
        let mut resolved = ResolvedConfig::new(ConfigPayload::new(model, key.name()));
        if let Some(variant_id) = &self.variant_id {
            resolved = resolved.variant("ab-test-1", variant_id.clone());
        }
        Ok(resolved)
    }

    async fn record_conversion(&self, variant_id: &str) -> Result<()> {
        if self.failing_conversions.load(Ordering::SeqCst) {
            return Err(VerdandiError::Http("conversion endpoint down".into()));
        }
        self.conversions.lock().unwrap().push(variant_id.to_string());
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        if self.hang_health.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(VerdandiError::Api {
                status: 500,
                message: "degraded".into(),
            });
        }
        Ok(())
    }
}

/// Fails its first resolve after three seconds; later resolves succeed
/// immediately.
#[derive(Default)]
struct ScriptedSource {
    calls: AtomicU32,
}

#[async_trait]
impl ConfigSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn resolve(&self, key: &CacheKey) -> Result<ResolvedConfig> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return Err(VerdandiError::Http("connection reset".into()));
        }
        Ok(ResolvedConfig::new(ConfigPayload::new("new-model", key.name())))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn client_with(source: &Arc<MockSource>, prewarm: &[&str]) -> ResolutionClient {
    ResolutionClient::builder()
        .shared_source(Arc::clone(source) as Arc<dyn ConfigSource>)
        .cache_config(
            CacheConfig::new()
                .fresh_ttl(5 * MINUTE)
                .stale_ceiling(60 * MINUTE)
                .max_entries(100),
        )
        .breaker_config(
            BreakerConfig::new()
                .timeout(Duration::from_secs(5))
                .reset_timeout(Duration::from_secs(30))
                .volume_threshold(5),
        )
        .refresh_config(
            RefreshConfig::new()
                .base_retry_delay(Duration::from_millis(100))
                .max_retry_delay(Duration::from_secs(1)),
        )
        .prewarm(prewarm.iter().copied())
        .build()
        .unwrap()
}

async fn wait_idle(client: &ResolutionClient) {
    while !client.refresh_manager().is_idle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Fail five resolves of an uncached key so the resolve circuit opens.
async fn trip(client: &ResolutionClient, source: &MockSource) {
    source.set_failing(true);
    for _ in 0..5 {
        let _ = client.resolve("uncached", false).await;
    }
    assert_eq!(client.breaker_state(), CircuitState::Open);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn fresh_hit_makes_no_network_call() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);

    let live = client.resolve("summary", false).await.unwrap();
    assert_eq!(live.source, ResolutionSource::Live);
    assert_eq!(live.config.model, "fast-model");

    tokio::time::advance(4 * MINUTE).await;
    let cached = client.resolve("summary", false).await.unwrap();
    assert_eq!(cached.source, ResolutionSource::Fresh);
    assert_eq!(cached.age, 4 * MINUTE);
    assert!(Arc::ptr_eq(&live.config, &cached.config));
    assert_eq!(source.calls(), 1);

    let stats = client.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn thinking_mode_resolves_separately() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);

    let standard = client.resolve("summary", false).await.unwrap();
    let thinking = client.resolve("summary", true).await.unwrap();
    assert_eq!(standard.config.model, "fast-model");
    assert_eq!(thinking.config.model, "deep-model");
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failure_serves_stale_entry_and_refreshes() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);
    let key = CacheKey::new("summary", false);

    client.resolve("summary", false).await.unwrap();
    tokio::time::advance(6 * MINUTE).await;

    source.set_failing(true);
    let stale = client.resolve("summary", false).await.unwrap();
    assert_eq!(stale.source, ResolutionSource::Stale);
    assert!(stale.is_stale());
    assert_eq!(stale.age, 6 * MINUTE);
    assert!(client.cache().is_refresh_in_progress(&key));

    // The service recovers before the background refresh runs.
    source.set_failing(false);
    wait_idle(&client).await;

    assert!(client.cache().is_fresh(&key));
    assert!(!client.cache().is_refresh_in_progress(&key));
    assert_eq!(source.calls(), 3);

    let fresh = client.resolve("summary", false).await.unwrap();
    assert_eq!(fresh.source, ResolutionSource::Fresh);
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_are_not_retried_in_background() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);

    client.resolve("summary", false).await.unwrap();
    tokio::time::advance(6 * MINUTE).await;

    source.unknown_key.store(true, Ordering::SeqCst);
    let stale = client.resolve("summary", false).await.unwrap();
    assert_eq!(stale.source, ResolutionSource::Stale);
    wait_idle(&client).await;

    // Initial call, failed live call, then a single background attempt.
    assert_eq!(source.calls(), 3);
    assert!(!client.cache().is_refresh_in_progress(&CacheKey::new("summary", false)));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_in_background() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);

    client.resolve("summary", false).await.unwrap();
    tokio::time::advance(6 * MINUTE).await;

    source.set_failing(true);
    client.resolve("summary", false).await.unwrap();
    wait_idle(&client).await;

    // Initial call, failed live call, then all four background attempts.
    // The last failure fills the window and opens the circuit.
    assert_eq!(source.calls(), 6);
    assert_eq!(client.breaker_state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn fallback_serves_the_entry_seen_before_the_call() {
    let key = CacheKey::new("summary", false);
    let slow = Arc::new(ScriptedSource::default());
    let racing = ResolutionClient::builder()
        .shared_source(Arc::clone(&slow) as Arc<dyn ConfigSource>)
        .build()
        .unwrap();
    racing
        .cache()
        .set(key.clone(), Arc::new(ConfigPayload::new("old-model", "p")), None);
    tokio::time::advance(6 * MINUTE).await;

    // The first call fails slowly while the second one refreshes the key.
    let (failed, live) = tokio::join!(
        racing.resolve("summary", false),
        racing.resolve("summary", false)
    );
    let live = live.unwrap();
    assert_eq!(live.source, ResolutionSource::Live);
    assert_eq!(live.config.model, "new-model");

    let failed = failed.unwrap();
    assert_eq!(failed.source, ResolutionSource::Stale);
    assert_eq!(failed.config.model, "old-model");
    assert!(failed.age >= 6 * MINUTE);
}

#[tokio::test(start_paused = true)]
async fn entry_crossing_ceiling_during_call_is_not_served() {
    let source = Arc::new(MockSource {
        latency: Duration::from_secs(10),
        ..Default::default()
    });
    let client = client_with(&source, &[]);
    let key = CacheKey::new("summary", false);

    client
        .cache()
        .set(key.clone(), Arc::new(ConfigPayload::new("old-model", "p")), None);
    tokio::time::advance(60 * MINUTE - Duration::from_secs(1)).await;

    // The 5s call timeout pushes the entry past the one-hour ceiling.
    let err = client.resolve("summary", false).await.unwrap_err();
    assert!(matches!(err, VerdandiError::ServiceUnavailable { .. }));
}

#[tokio::test(start_paused = true)]
async fn failure_without_cache_is_unavailable() {
    let source = Arc::new(MockSource::default());
    source.set_failing(true);
    let client = client_with(&source, &[]);

    let err = client.resolve("summary", false).await.unwrap_err();
    assert!(matches!(err, VerdandiError::ServiceUnavailable { .. }));
    assert!(client.refresh_manager().is_idle());
}

#[tokio::test(start_paused = true)]
async fn entry_past_ceiling_is_not_a_fallback() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);

    client.resolve("summary", false).await.unwrap();
    tokio::time::advance(61 * MINUTE).await;
    source.set_failing(true);

    let err = client.resolve("summary", false).await.unwrap_err();
    assert!(matches!(err, VerdandiError::ServiceUnavailable { .. }));
    assert!(client.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn open_circuit_fails_fast() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);

    client.resolve("summary", false).await.unwrap();
    tokio::time::advance(6 * MINUTE).await;
    trip(&client, &source).await;
    let calls = source.calls();

    // Even with a stale entry cached, an open circuit reports unavailable
    // without calling the service.
    let err = client.resolve("summary", false).await.unwrap_err();
    assert!(matches!(err, VerdandiError::ServiceUnavailable { .. }));
    assert_eq!(source.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_survive_an_open_circuit() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);

    client.resolve("summary", false).await.unwrap();
    trip(&client, &source).await;

    let cached = client.resolve("summary", false).await.unwrap();
    assert_eq!(cached.source, ResolutionSource::Fresh);
}

#[tokio::test(start_paused = true)]
async fn slow_service_times_out_and_falls_back() {
    let source = Arc::new(MockSource {
        latency: Duration::from_secs(10),
        ..Default::default()
    });
    let client = client_with(&source, &[]);

    let err = client.resolve("summary", false).await.unwrap_err();
    assert!(matches!(err, VerdandiError::ServiceUnavailable { ref reason } if reason.contains("timed out")));
    assert_eq!(client.breaker().snapshot().window_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_prewarms_configured_keys() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &["summary"]);
    assert_eq!(client.prewarm_keys().len(), 2);

    trip(&client, &source).await;
    source.set_failing(false);
    tokio::time::advance(Duration::from_secs(30)).await;

    // The half-open probe succeeds and closes the circuit.
    let probe = client.resolve("uncached", false).await.unwrap();
    assert_eq!(probe.source, ResolutionSource::Live);
    assert_eq!(client.breaker_state(), CircuitState::Closed);

    wait_idle(&client).await;
    assert!(client.cache().is_fresh(&CacheKey::new("summary", false)));
    assert!(client.cache().is_fresh(&CacheKey::new("summary", true)));
}

#[tokio::test(start_paused = true)]
async fn live_resolution_records_conversion() {
    let source = Arc::new(MockSource {
        variant_id: Some("variant-b".to_string()),
        ..Default::default()
    });
    let client = client_with(&source, &[]);

    let live = client.resolve("summary", false).await.unwrap();
    assert_eq!(live.variant_id.as_deref(), Some("variant-b"));
    assert_eq!(live.ab_test_id.as_deref(), Some("ab-test-1"));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(source.conversions(), vec!["variant-b"]);

    // Cached resolutions keep the variant but do not record again.
    let cached = client.resolve("summary", false).await.unwrap();
    assert_eq!(cached.variant_id.as_deref(), Some("variant-b"));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(source.conversions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn conversion_failures_are_swallowed() {
    let source = Arc::new(MockSource {
        variant_id: Some("variant-b".to_string()),
        ..Default::default()
    });
    source.failing_conversions.store(true, Ordering::SeqCst);
    let client = client_with(&source, &[]);

    let live = client.resolve("summary", false).await.unwrap();
    assert_eq!(live.source, ResolutionSource::Live);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(source.conversions().is_empty());
    // The resolve breaker is unaffected by conversion failures.
    assert_eq!(client.breaker().snapshot().window_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn health_check_never_errors() {
    let source = Arc::new(MockSource::default());
    let client = client_with(&source, &[]);
    assert!(client.health_check().await);

    source.unhealthy.store(true, Ordering::SeqCst);
    assert!(!client.health_check().await);

    source.unhealthy.store(false, Ordering::SeqCst);
    source.hang_health.store(true, Ordering::SeqCst);
    assert!(!client.health_check().await);
}

#[tokio::test(start_paused = true)]
async fn shutdown_disposes_registered_breakers() {
    let source = Arc::new(MockSource::default());
    let registry = Arc::new(BreakerRegistry::new());
    let client = ResolutionClient::builder()
        .shared_source(Arc::clone(&source) as Arc<dyn ConfigSource>)
        .registry(Arc::clone(&registry))
        .build()
        .unwrap();

    client.resolve("summary", false).await.unwrap();
    client.shutdown().await;

    assert!(registry.get(RESOLVE_BREAKER).unwrap().is_disposed());
    assert!(registry.get(CONVERSION_BREAKER).unwrap().is_disposed());

    // Cached data is still served.
    let cached = client.resolve("summary", false).await.unwrap();
    assert_eq!(cached.source, ResolutionSource::Fresh);
}
