//! Named circuit breaker registry
//!
//! Breakers are looked up by name so that every dispatch attempt for the
//! same dependency shares one breaker and one state machine.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tally_core::CircuitBreakerConfig;

use crate::circuit_breaker::CircuitBreaker;

/// Registry of circuit breakers keyed by name
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use `default_config`
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with default thresholds
    pub fn of_defaults() -> Self {
        Self::default()
    }

    /// Get the breaker registered under `name`, creating it on first use
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.find(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Registering circuit breaker '{}'", name);
                Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    /// Get the breaker registered under `name`, if any
    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all registered breakers
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
