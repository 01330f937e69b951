//! Caching subsystem.
//!
//! [`CacheStore`] holds resolved configurations keyed on
//! [`CacheKey`](crate::CacheKey). It implements stale-while-revalidate
//! without a background clock: the [`ResolutionClient`](crate::ResolutionClient)
//! serves fresh entries directly, falls back to stale entries when the
//! configuration service fails, and relies on the
//! [`BackgroundRefreshManager`](crate::BackgroundRefreshManager) to repair
//! them. The in-progress marker set on the store is what keeps refreshes of
//! one key from overlapping.

pub mod store;

pub use store::{CacheConfig, CacheEntry, CacheStats, CacheStore, Lookup};
