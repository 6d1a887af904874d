//! Event fan-out to registered listeners
//!
//! Each listener runs on its own task, so a listener that panics or stalls
//! cannot affect the others or the publisher.

use std::sync::Arc;

use futures::future::join_all;
use tally_core::Event;
use tracing::{debug, warn};

use crate::listener::EventListener;

/// Delivers every published event to every registered listener
#[derive(Clone, Default)]
pub struct EventPropagator {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for all subsequent events
    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) {
        debug!("Registered event listener '{}'", listener.name());
        self.listeners.push(listener);
    }

    /// Publish one event and wait for every listener to finish with it
    ///
    /// Returns how many listeners completed normally.
    pub async fn process_event(&self, event: Event) -> usize {
        let event = Arc::new(event);

        let handles: Vec<_> = self
            .listeners
            .iter()
            .map(|listener| {
                let listener = Arc::clone(listener);
                let event = Arc::clone(&event);
                tokio::spawn(async move { listener.process_event(&event).await })
            })
            .collect();

        let mut completed = 0;
        for (listener, joined) in self.listeners.iter().zip(join_all(handles).await) {
            match joined {
                Ok(()) => completed += 1,
                Err(e) => warn!("Listener '{}' failed on event: {}", listener.name(), e),
            }
        }
        completed
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for EventPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|l| l.name()).collect();
        f.debug_struct("EventPropagator").field("listeners", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventListener for CountingListener {
        fn name(&self) -> &str {
            "counting"
        }

        async fn process_event(&self, _event: &Event) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingListener;

    #[async_trait]
    impl EventListener for PanickingListener {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn process_event(&self, _event: &Event) {
            panic!("listener bug");
        }
    }

    #[tokio::test]
    async fn test_empty_propagator() {
        let propagator = EventPropagator::new();
        assert!(propagator.is_empty());
        assert_eq!(propagator.process_event(Event::default()).await, 0);
    }

    #[tokio::test]
    async fn test_fans_out_to_every_listener() {
        let first = Arc::new(CountingListener { seen: AtomicUsize::new(0) });
        let second = Arc::new(CountingListener { seen: AtomicUsize::new(0) });

        let mut propagator = EventPropagator::new();
        propagator.add_listener(first.clone());
        propagator.add_listener(second.clone());

        assert_eq!(propagator.process_event(Event::default()).await, 2);
        assert_eq!(propagator.process_event(Event::default()).await, 2);
        assert_eq!(first.seen.load(Ordering::SeqCst), 2);
        assert_eq!(second.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let counting = Arc::new(CountingListener { seen: AtomicUsize::new(0) });

        let mut propagator = EventPropagator::new();
        propagator.add_listener(Arc::new(PanickingListener));
        propagator.add_listener(counting.clone());

        assert_eq!(propagator.process_event(Event::default()).await, 1);
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
        assert_eq!(propagator.len(), 2);
    }
}
