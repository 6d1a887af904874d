//! # tally-client
//!
//! Delivery path from Tally to the external stats collector.
//!
//! - Circuit breaker state machine with a named registry
//! - `StatsService` trait and its HTTP implementation
//! - `ResilientDispatcher`, which never lets a collector failure escape
//!
//! ## Key Pattern
//!
//! All dispatch attempts in a process share the breaker registered under
//! [`TELEMETRY_BREAKER_NAME`]. Once it opens, events are dropped without a
//! network round trip until the cool-down has passed.

mod circuit_breaker;
mod client;
mod dispatcher;
mod registry;
#[cfg(test)]
mod test_support;

pub use circuit_breaker::{BreakerMetrics, CallPermit, CircuitBreaker, CircuitBreakerEvent, CircuitState};
pub use client::{hash, HttpStatsService, StatsEvent, StatsService};
pub use dispatcher::{DispatchOutcome, ResilientDispatcher, TELEMETRY_BREAKER_NAME};
pub use registry::CircuitBreakerRegistry;
