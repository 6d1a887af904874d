//! Startup wiring for the telemetry subsystem
//!
//! Construction order matters: the instance id is resolved before the
//! listener exists, so every reported event carries the final id.

use std::sync::Arc;

use tally_client::{CircuitBreakerRegistry, HttpStatsService, ResilientDispatcher, StatsService};
use tally_core::{Result, TelemetryConfig};
use tally_identity::{BackendSelector, InstanceIdSupplier};
use tracing::info;

use crate::filter::EventFilter;
use crate::listener::TelemetryEventListener;
use crate::propagator::EventPropagator;

/// The assembled telemetry subsystem
#[derive(Debug)]
pub struct TelemetryRuntime {
    identity: InstanceIdSupplier,
    registry: CircuitBreakerRegistry,
    listener: Option<Arc<TelemetryEventListener>>,
}

impl TelemetryRuntime {
    /// Build the runtime described by `config`
    ///
    /// Opens the configured coordination backend and the HTTP collector
    /// client. Fails if the breaker thresholds are invalid or the HTTP
    /// client cannot be constructed.
    pub async fn bootstrap(config: &TelemetryConfig) -> Result<Self> {
        config.circuit_breaker.validate()?;
        let selector = BackendSelector::from_config(&config.coordination).await;
        let service = Arc::new(HttpStatsService::from_config(config)?);
        Ok(Self::with_service(config, Some(&selector), service).await)
    }

    /// Build the runtime around an explicit collector and coordination store
    pub async fn with_service(
        config: &TelemetryConfig,
        selector: Option<&BackendSelector>,
        service: Arc<dyn StatsService>,
    ) -> Self {
        let identity = InstanceIdSupplier::resolve(config, selector).await;
        info!("Telemetry instance id: {}", identity.unique_id());

        let registry = CircuitBreakerRegistry::new(config.circuit_breaker.clone());

        let listener = if config.enabled {
            let filter = EventFilter::from_config(config, identity.unique_id());
            let dispatcher = ResilientDispatcher::new(service, &registry);
            info!("Telemetry enabled, reporting to {}", config.endpoint);
            Some(Arc::new(TelemetryEventListener::new(filter, dispatcher)))
        } else {
            info!("Telemetry disabled");
            None
        };

        Self {
            identity,
            registry,
            listener,
        }
    }

    pub fn identity(&self) -> &InstanceIdSupplier {
        &self.identity
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    /// The telemetry listener, absent when telemetry is disabled
    pub fn listener(&self) -> Option<&Arc<TelemetryEventListener>> {
        self.listener.as_ref()
    }

    /// Attach the listener to `propagator`; a no-op when disabled
    pub fn register(&self, propagator: &mut EventPropagator) {
        if let Some(listener) = &self.listener {
            propagator.add_listener(listener.clone());
        }
    }
}
