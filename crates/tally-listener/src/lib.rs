//! # tally-listener
//!
//! Connects the host event bus to the stats collector.
//!
//! - `EventFilter` decides which events are reportable
//! - `TelemetryEventListener` filters and dispatches every event it sees
//! - `EventPropagator` fans events out to listeners on separate tasks
//! - `TelemetryRuntime` resolves identity and assembles the pieces
//!
//! ## Usage
//!
//! ```no_run
//! use tally_core::{Event, TelemetryConfig};
//! use tally_listener::{EventPropagator, TelemetryRuntime};
//!
//! async fn run(config: TelemetryConfig, event: Event) -> tally_core::Result<()> {
//!     let runtime = TelemetryRuntime::bootstrap(&config).await?;
//!     let mut propagator = EventPropagator::new();
//!     runtime.register(&mut propagator);
//!     propagator.process_event(event).await;
//!     Ok(())
//! }
//! ```

mod filter;
mod listener;
mod propagator;
mod runtime;

pub use filter::{EventFilter, FilterRejection};
pub use listener::{EventListener, ProcessOutcome, TelemetryEventListener};
pub use propagator::EventPropagator;
pub use runtime::TelemetryRuntime;
