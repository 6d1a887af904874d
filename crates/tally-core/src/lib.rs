//! # tally-core
//!
//! Core types for the Tally fleet telemetry subsystem.
//!
//! Tally watches the domain events flowing through a host service, picks out
//! the handful that count as usage statistics, and forwards a sanitized
//! summary to an external stats collector. Every instance of the host is
//! tagged with a fleet-unique identifier negotiated through a shared store.
//!
//! ## Crate Map
//!
//! - `tally-core` - events, payloads, configuration, errors (this crate)
//! - `tally-identity` - instance identity negotiation
//! - `tally-client` - circuit breaker and collector client
//! - `tally-listener` - event filter, listener and runtime bootstrap

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{CircuitBreakerConfig, CoordinationBackendKind, CoordinationConfig, TelemetryConfig};
pub use error::{Result, TallyError};
pub use types::*;
