//! Telemetry metric name constants.
//!
//! Centralised metric names for verdandi operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `verdandi_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `source`: where a resolution came from: "fresh", "live", "stale",
//!   or "unavailable"
//! - `breaker`: circuit breaker name (e.g. "config-resolve")
//! - `state`: breaker state entered: "open", "half_open", "closed"
//! - `outcome`: background refresh outcome: "success", "failure",
//!   "timeout", "halted", "cancelled"

/// Total resolution requests served by the client.
///
/// Labels: `source`.
pub const RESOLUTIONS_TOTAL: &str = "verdandi_resolutions_total";

/// Duration of live resolve calls in seconds.
pub const RESOLVE_DURATION_SECONDS: &str = "verdandi_resolve_duration_seconds";

/// Total cache hits (fresh entries served without a network call).
pub const CACHE_HITS_TOTAL: &str = "verdandi_cache_hits_total";

/// Total cache misses (absent or stale entries).
pub const CACHE_MISSES_TOTAL: &str = "verdandi_cache_misses_total";

/// Total entries evicted by LRU pressure.
pub const CACHE_EVICTIONS_TOTAL: &str = "verdandi_cache_evictions_total";

/// Total entries deleted for exceeding the stale ceiling.
pub const CACHE_EXPIRATIONS_TOTAL: &str = "verdandi_cache_expirations_total";

/// Total breaker state transitions.
///
/// Labels: `breaker`, `state`.
pub const BREAKER_TRANSITIONS_TOTAL: &str = "verdandi_breaker_transitions_total";

/// Total calls rejected by an open breaker.
///
/// Labels: `breaker`.
pub const BREAKER_REJECTIONS_TOTAL: &str = "verdandi_breaker_rejections_total";

/// Total calls that exceeded the breaker's per-call timeout.
///
/// Labels: `breaker`.
pub const BREAKER_TIMEOUTS_TOTAL: &str = "verdandi_breaker_timeouts_total";

/// Total background refreshes accepted by the manager.
pub const REFRESH_SCHEDULED_TOTAL: &str = "verdandi_refresh_scheduled_total";

/// Total background refreshes finished, by outcome.
///
/// Labels: `outcome`.
pub const REFRESH_OUTCOMES_TOTAL: &str = "verdandi_refresh_outcomes_total";

/// Total retry attempts made by background refreshes (not counting the
/// first attempt).
pub const REFRESH_RETRIES_TOTAL: &str = "verdandi_refresh_retries_total";

/// Total queued refreshes dropped because the queue was full.
pub const REFRESH_DROPPED_TOTAL: &str = "verdandi_refresh_dropped_total";

/// Total conversion recordings, by status ("ok" | "error").
pub const CONVERSIONS_TOTAL: &str = "verdandi_conversions_total";
