//! Core ConfigSource trait

use async_trait::async_trait;

use crate::{CacheKey, ResolvedConfig, Result};

/// The downstream configuration service, as seen by the client.
///
/// [`HttpConfigSource`](crate::HttpConfigSource) implements the HTTP
/// contract; tests and embedders can substitute their own source. Errors
/// must already be translated into [`VerdandiError`](crate::VerdandiError);
/// no transport error type crosses this boundary.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Resolve the active configuration for `key`.
    async fn resolve(&self, key: &CacheKey) -> Result<ResolvedConfig>;

    /// Record that an A/B variant was used. Fire-and-forget from the
    /// caller's point of view.
    async fn record_conversion(&self, _variant_id: &str) -> Result<()> {
        Ok(())
    }

    /// Succeeds when the service reports itself healthy.
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
