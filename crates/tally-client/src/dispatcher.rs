//! Breaker-guarded delivery of telemetry events
//!
//! Delivery is best-effort. Whatever happens on the way to the collector is
//! recorded by the breaker and logged, and the caller only ever gets back a
//! [`DispatchOutcome`].

use std::sync::Arc;

use tally_core::fail_open::catch_fault;
use tally_core::ReportableTelemetryEvent;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::client::StatsService;
use crate::registry::CircuitBreakerRegistry;

/// Registry name of the breaker guarding the stats collector
pub const TELEMETRY_BREAKER_NAME: &str = "telemetry";

/// What happened to one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The collector accepted the event
    Delivered,
    /// The call was made and failed; the breaker recorded it
    Failed,
    /// The breaker was open; no call was made
    Rejected,
}

/// Sends reportable events to the collector through the telemetry breaker
#[derive(Clone)]
pub struct ResilientDispatcher {
    service: Arc<dyn StatsService>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientDispatcher {
    /// Create a dispatcher using the `telemetry` breaker from `registry`
    pub fn new(service: Arc<dyn StatsService>, registry: &CircuitBreakerRegistry) -> Self {
        Self {
            service,
            breaker: registry.circuit_breaker(TELEMETRY_BREAKER_NAME),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Attempt delivery of one event
    ///
    /// Never fails: collector errors and panics inside the client are
    /// recorded as breaker failures and swallowed.
    pub async fn dispatch(&self, event: &ReportableTelemetryEvent) -> DispatchOutcome {
        let Some(permit) = self.breaker.try_acquire() else {
            debug!(
                "Telemetry not sent: circuit breaker '{}' is open ({}ms until retry)",
                self.breaker.name(),
                self.breaker.time_until_retry()
            );
            return DispatchOutcome::Rejected;
        };

        match catch_fault(self.service.log(event)).await {
            Ok(()) => {
                permit.on_success();
                debug!("Telemetry sent for {}", event.event_type);
                DispatchOutcome::Delivered
            }
            Err(e) => {
                permit.on_failure(&e.to_string());
                warn!("Could not send telemetry event {}: {}", event.event_type, e);
                DispatchOutcome::Failed
            }
        }
    }
}

impl std::fmt::Debug for ResilientDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientDispatcher")
            .field("breaker", &self.breaker)
            .finish()
    }
}
