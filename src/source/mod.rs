//! Configuration service backends.

mod http;
pub mod sanitize;

pub use http::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, HttpConfigSource};
