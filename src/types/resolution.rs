//! Resolution results returned to callers

use std::sync::Arc;
use std::time::Duration;

use super::ConfigPayload;

/// Where a [`Resolution`] was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Fresh cache entry, no network call.
    Fresh,
    /// Live call to the configuration service.
    Live,
    /// The live call failed; a cached entry past its freshness TTL was
    /// served and a background refresh was scheduled.
    Stale,
}

impl ResolutionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionSource::Fresh => "fresh",
            ResolutionSource::Live => "live",
            ResolutionSource::Stale => "stale",
        }
    }
}

/// A resolved configuration together with its provenance.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: Arc<ConfigPayload>,
    pub variant_id: Option<String>,
    /// Only known for live resolutions; the cache does not retain it.
    pub ab_test_id: Option<String>,
    pub source: ResolutionSource,
    /// Age of the data at the time it was served (zero for live results).
    pub age: Duration,
}

impl Resolution {
    /// True when the payload may be outdated.
    pub fn is_stale(&self) -> bool {
        self.source == ResolutionSource::Stale
    }
}
