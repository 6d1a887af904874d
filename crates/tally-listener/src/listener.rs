//! Telemetry event listener
//!
//! Sees every event on the host bus, reports the few that matter and
//! swallows every failure along the way.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tally_client::{DispatchOutcome, ResilientDispatcher};
use tally_core::fail_open::panic_message;
use tally_core::Event;
use tracing::{trace, warn};

use crate::filter::EventFilter;

/// Something that wants to see events from the host bus
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Handle one event
    ///
    /// Implementations must not let failures escape; the bus treats
    /// listeners as fire-and-forget.
    async fn process_event(&self, event: &Event);
}

/// Result of handing one event to the telemetry listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event was not reportable
    Ignored,
    /// The event was handed to the dispatcher
    Dispatched(DispatchOutcome),
    /// Something panicked while handling the event
    Faulted,
}

/// Filters events and forwards reportable ones to the collector
#[derive(Debug, Clone)]
pub struct TelemetryEventListener {
    filter: EventFilter,
    dispatcher: ResilientDispatcher,
}

impl TelemetryEventListener {
    pub fn new(filter: EventFilter, dispatcher: ResilientDispatcher) -> Self {
        Self { filter, dispatcher }
    }

    pub fn dispatcher(&self) -> &ResilientDispatcher {
        &self.dispatcher
    }

    /// Handle one event and report what happened
    pub async fn handle(&self, event: &Event) -> ProcessOutcome {
        let handled = AssertUnwindSafe(async {
            match self.filter.evaluate(event) {
                Ok(reportable) => ProcessOutcome::Dispatched(self.dispatcher.dispatch(&reportable).await),
                Err(rejection) => {
                    trace!(
                        "Telemetry not sent for {:?}: {}",
                        event.details.as_ref().and_then(|d| d.event_type.as_deref()),
                        rejection
                    );
                    ProcessOutcome::Ignored
                }
            }
        })
        .catch_unwind()
        .await;

        match handled {
            Ok(outcome) => outcome,
            Err(panic) => {
                warn!(
                    "Could not send telemetry event {:?}: {}",
                    event.details,
                    panic_message(panic.as_ref())
                );
                ProcessOutcome::Faulted
            }
        }
    }
}

#[async_trait]
impl EventListener for TelemetryEventListener {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn process_event(&self, event: &Event) {
        self.handle(event).await;
    }
}
