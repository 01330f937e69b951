//! Verdandi error types

use std::time::Duration;

/// Verdandi error types
#[derive(Debug, thiserror::Error)]
pub enum VerdandiError {
    // Caller-facing
    /// No usable configuration: the circuit is open, or the live call failed
    /// and nothing was cached for the key.
    #[error("configuration service temporarily unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    // Breaker errors
    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    // Network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("component has been shut down")]
    Shutdown,
}

impl VerdandiError {
    /// Whether retrying the same call may succeed.
    ///
    /// Network failures, timeouts and 5xx/429 responses are transient.
    /// Client errors, configuration problems and shutdown are not.
    pub fn is_transient(&self) -> bool {
        match self {
            VerdandiError::Http(_) | VerdandiError::Timeout(_) => true,
            VerdandiError::Api { status, .. } => *status == 429 || *status >= 500,
            VerdandiError::CircuitOpen { .. } | VerdandiError::ServiceUnavailable { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        VerdandiError::ServiceUnavailable {
            reason: reason.into(),
        }
    }
}

/// Result type alias for Verdandi operations
pub type Result<T> = std::result::Result<T, VerdandiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = VerdandiError::Api {
            status: 503,
            message: "down".into(),
        };
        assert!(err.is_transient());
        assert!(VerdandiError::Http("reset".into()).is_transient());
        assert!(VerdandiError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        let err = VerdandiError::Api {
            status: 404,
            message: "no such key".into(),
        };
        assert!(!err.is_transient());
        assert!(!VerdandiError::Configuration("bad".into()).is_transient());
        assert!(!VerdandiError::Shutdown.is_transient());
    }

    #[test]
    fn rate_limit_is_transient() {
        let err = VerdandiError::Api {
            status: 429,
            message: String::new(),
        };
        assert!(err.is_transient());
    }
}
