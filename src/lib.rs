//! Verdandi - Resilient client for a remote configuration service
//!
//! This crate resolves named AI-completion configurations (model, prompt,
//! generation parameters, A/B variant) from a remote service and keeps the
//! application working when that service is slow or down:
//!
//! - a TTL-aware LRU [`CacheStore`] serves fresh entries without a network
//!   round-trip and keeps stale ones as a fallback,
//! - a [`CircuitBreaker`] stops hammering a failing service,
//! - a [`BackgroundRefreshManager`] repairs stale entries with bounded
//!   concurrency, retries and deadlines,
//! - the [`ResolutionClient`] ties them together.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use verdandi::{BreakerRegistry, ClientConfig, ResolutionClient};
//!
//! #[tokio::main]
//! async fn main() -> verdandi::Result<()> {
//!     let config = ClientConfig::load(None)?;
//!     let registry = Arc::new(BreakerRegistry::new());
//!     let client = ResolutionClient::from_config(&config, registry)?;
//!
//!     let resolution = client.resolve("summarize", true).await?;
//!     if resolution.is_stale() {
//!         eprintln!("serving configuration {:?} old", resolution.age);
//!     }
//!     println!("model: {}", resolution.config.model);
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod refresh;
pub mod source;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use breaker::{
    BreakerConfig, BreakerEvent, BreakerListener, BreakerRegistry, BreakerSnapshot,
    CircuitBreaker, CircuitState,
};
pub use cache::{CacheConfig, CacheEntry, CacheStats, CacheStore, Lookup};
pub use client::{ResolutionClient, ResolutionClientBuilder};
pub use config::ClientConfig;
pub use error::{Result, VerdandiError};
pub use refresh::{BackgroundRefreshManager, RefreshConfig, RefreshHandler};
pub use source::HttpConfigSource;
pub use traits::ConfigSource;

// Re-export all types
pub use types::{
    CacheKey, ConfigPayload, Resolution, ResolutionSource, ResolvedConfig, ThinkingConfig,
};
