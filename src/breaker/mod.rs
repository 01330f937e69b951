//! Circuit breaking for calls to the configuration service.
//!
//! [`CircuitBreaker`] wraps any async operation returning
//! [`Result`](crate::Result). Breakers are created through a
//! [`BreakerRegistry`] so that shutdown can dispose all of them explicitly;
//! there is no global registry.

mod circuit;
pub mod registry;

pub use circuit::{
    BreakerConfig, BreakerEvent, BreakerListener, BreakerSnapshot, CircuitBreaker, CircuitState,
};
pub use registry::BreakerRegistry;
