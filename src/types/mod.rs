//! Public types for the Verdandi API.

mod key;
mod payload;
mod resolution;

pub use key::CacheKey;
pub use payload::{ConfigPayload, ResolvedConfig, ThinkingConfig};
pub use resolution::{Resolution, ResolutionSource};
