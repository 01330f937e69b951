//! Background refresh of cached data.
//!
//! [`BackgroundRefreshManager`] is generic over the task identifier and knows
//! nothing about caches or HTTP: everything it needs (claiming a task,
//! running it, reporting outcomes) comes from a [`RefreshHandler`]. The
//! [`ResolutionClient`](crate::ResolutionClient) plugs in a handler that
//! re-resolves a [`CacheKey`](crate::CacheKey) through its circuit breaker
//! and writes the result into the cache.

mod config;
mod manager;

pub use config::RefreshConfig;
pub use manager::{BackgroundRefreshManager, RefreshHandler};
