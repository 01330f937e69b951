//! Explicit registry of circuit breakers.
//!
//! Owned by the process root and handed to the components that create
//! breakers, so shutdown can dispose every breaker in one place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use super::{BreakerConfig, CircuitBreaker};

/// Named collection of [`CircuitBreaker`]s.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a breaker, or return the one already registered under `name`.
    ///
    /// An existing breaker keeps its original configuration.
    pub fn register(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(name) {
            if existing.config() != &config {
                warn!(breaker = name, "breaker already registered with a different config");
            }
            return Arc::clone(existing);
        }
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every registered breaker.
    pub fn shutdown(&self) {
        let breakers = self.lock();
        for breaker in breakers.values() {
            breaker.dispose();
        }
        info!(count = breakers.len(), "disposed circuit breakers");
    }
}
